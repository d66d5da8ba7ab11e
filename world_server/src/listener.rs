//! Inbound connection acceptor.
//!
//! The accept loop is kept tiny: admission control, socket tuning, session
//! construction. Per-session work runs in the session's own detached tasks
//! so a slow or faulty client never stalls accepting new ones. Accept
//! errors that indicate the listener itself is gone end the loop; anything
//! else is logged and the loop keeps serving the healthy majority.

use std::sync::Arc;

use smol::net::TcpListener;

use crate::ingress::Job;
use crate::prelude::*;
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionEvent};

pub async fn accept_connections(
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    events: flume::Sender<SessionEvent>,
    jobs: flume::Sender<Job>,
    max_connections: usize,
    stop: flume::Receiver<()>,
) {
    loop {
        let accepted = {
            let accept = async { Some(listener.accept().await) };
            let stopped = async {
                let _ = stop.recv_async().await;
                None
            };
            smol::future::race(accept, stopped).await
        };
        let Some(result) = accepted else {
            info!("accept loop stopping");
            break;
        };
        let (stream, remote_addr) = match result {
            Ok(connection) => connection,
            Err(e) => {
                use std::io::ErrorKind::*;
                match e.kind() {
                    Interrupted | NotConnected | BrokenPipe => {
                        info!("accept loop ending: {}", e);
                        break;
                    }
                    _ => {
                        error!("accept error: {}", e);
                        continue;
                    }
                }
            }
        };

        if registry.count() >= max_connections {
            warn!(
                "connection cap {} reached; refusing {}",
                max_connections, remote_addr
            );
            drop(stream);
            continue;
        }

        if let Err(e) = stream.set_nodelay(true) {
            warn!("failed to disable nagle for {}: {}", remote_addr, e);
        }

        let session = Session::new(stream, remote_addr, events.clone(), jobs.clone());
        info!("client connected: {} (session {})", remote_addr, session.id());
        registry.add(Arc::clone(&session));
        session.start();
    }
}
