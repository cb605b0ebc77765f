//! TCP feed of delivered results as length-delimited `ProtoMsg` frames.
//!
use std::net::SocketAddr;

use anyhow::Result;
use bytes::Bytes;
use common::protocol::{ProtoMsg, ResultMsg};
use futures::SinkExt;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Bind `addr` and forward every result to each connected subscriber.
///
/// Returns the bound address, which differs from `addr` when binding port 0.
pub async fn spawn_results_socket(
    results_tx: broadcast::Sender<ResultMsg>,
    addr: &str,
) -> Result<(SocketAddr, JoinHandle<Result<(), std::io::Error>>)> {
    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        loop {
            let (socket, _) = listener.accept().await?;
            let results_rx = results_tx.subscribe();
            tokio::spawn(async move {
                if let Err(err) = handle_subscriber(socket, results_rx).await {
                    log::info!("Results subscriber gone: {err}");
                }
            });
        }
    });

    Ok((local_addr, handle))
}

async fn handle_subscriber(
    stream: TcpStream,
    mut results_rx: broadcast::Receiver<ResultMsg>,
) -> Result<()> {
    let peer = stream.peer_addr()?;
    log::info!("{peer}: New results subscriber");

    let mut transport = Framed::new(stream, LengthDelimitedCodec::new());
    loop {
        match results_rx.recv().await {
            Ok(msg) => {
                let data = ProtoMsg::Result(msg).serialize()?;
                transport.send(Bytes::from(data)).await?;
            }
            Err(RecvError::Lagged(missed)) => {
                log::warn!("{peer}: Subscriber lagging, skipped {missed} results");
            }
            Err(RecvError::Closed) => break,
        }
    }

    Ok(())
}
