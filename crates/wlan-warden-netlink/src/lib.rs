//! Thin async wrapper over `rtnetlink` for the link-level operations the
//! native interface backend needs: bringing an interface up/down, deleting
//! it, and watching RTNLGRP_LINK for unsolicited link-state changes so the
//! Warden can react to an interface going down or disappearing out from
//! under it.

#[cfg(target_os = "linux")]
mod linux {
    use std::time::Duration;

    use thiserror::Error;
    use tokio::sync::mpsc;
    use tracing::{debug, warn};

    #[derive(Debug, Error)]
    pub enum NetlinkError {
        #[error("netlink connection failed: {0}")]
        Connect(#[source] std::io::Error),
        #[error("interface {0} not found")]
        NotFound(String),
        #[error("netlink request failed: {0}")]
        Request(#[source] rtnetlink::Error),
    }

    /// Link-level events forwarded from the kernel's RTNLGRP_LINK multicast
    /// group, debounced only at the consumer (this layer forwards every
    /// message it observes).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum LinkEvent {
        Changed,
    }

    /// A connected netlink handle plus the background task driving it.
    /// Dropping this stops the underlying connection.
    pub struct NetlinkHandle {
        handle: rtnetlink::Handle,
        _conn_task: tokio::task::JoinHandle<()>,
    }

    impl NetlinkHandle {
        pub fn new() -> Result<Self, NetlinkError> {
            let (connection, handle) = rtnetlink::new_connection().map_err(NetlinkError::Connect)?;
            // RTNLGRP_LINK = 1: subscribe so unsolicited link-state changes
            // (carrier up/down, interface deleted) surface on this same
            // socket without a separate poll.
            if let Err(e) = connection.socket_ref().add_membership(1) {
                warn!("failed to subscribe to link change events: {e}");
            }
            let conn_task = tokio::spawn(connection.run());
            Ok(Self {
                handle,
                _conn_task: conn_task,
            })
        }

        async fn ifindex(&self, name: &str) -> Result<u32, NetlinkError> {
            use futures::stream::TryStreamExt;
            let mut links = self.handle.link().get().match_name(name.to_string()).execute();
            match links
                .try_next()
                .await
                .map_err(NetlinkError::Request)?
            {
                Some(link) => Ok(link.header.index),
                None => Err(NetlinkError::NotFound(name.to_string())),
            }
        }

        pub async fn set_link_up(&self, name: &str) -> Result<(), NetlinkError> {
            let index = self.ifindex(name).await?;
            self.handle
                .link()
                .set(index)
                .up()
                .execute()
                .await
                .map_err(NetlinkError::Request)
        }

        pub async fn set_link_down(&self, name: &str) -> Result<(), NetlinkError> {
            let index = self.ifindex(name).await?;
            self.handle
                .link()
                .set(index)
                .down()
                .execute()
                .await
                .map_err(NetlinkError::Request)
        }

        pub async fn delete_link(&self, name: &str) -> Result<(), NetlinkError> {
            let index = self.ifindex(name).await?;
            self.handle
                .link()
                .del(index)
                .execute()
                .await
                .map_err(NetlinkError::Request)
        }

        pub async fn is_link_up(&self, name: &str) -> bool {
            use futures::stream::TryStreamExt;
            let mut links = self.handle.link().get().match_name(name.to_string()).execute();
            match links.try_next().await {
                Ok(Some(link)) => link.header.flags & libc::IFF_UP as u32 != 0,
                _ => false,
            }
        }

        /// Forwards a [`LinkEvent::Changed`] for every link message observed
        /// on the RTNLGRP_LINK membership subscribed in [`Self::new`], for
        /// as long as the underlying connection stays up. Restarts the dump
        /// with a backoff if the stream ends.
        pub fn watch_links(&self) -> mpsc::UnboundedReceiver<LinkEvent> {
            let (tx, rx) = mpsc::unbounded_channel();
            let handle = self.handle.clone();
            tokio::spawn(async move {
                use futures::stream::StreamExt;
                loop {
                    let mut link_stream = handle.link().get().execute();
                    while link_stream.next().await.is_some() {
                        debug!("netlink link event observed");
                        if tx.send(LinkEvent::Changed).is_err() {
                            return;
                        }
                    }
                    warn!("netlink link stream ended; restarting in 5s");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            });
            rx
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::{LinkEvent, NetlinkError, NetlinkHandle};

#[cfg(not(target_os = "linux"))]
mod stub {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum NetlinkError {
        #[error("netlink is only available on linux")]
        Unsupported,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum LinkEvent {
        Changed,
    }

    pub struct NetlinkHandle;

    impl NetlinkHandle {
        pub fn new() -> Result<Self, NetlinkError> {
            Err(NetlinkError::Unsupported)
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use stub::{LinkEvent, NetlinkError, NetlinkHandle};
