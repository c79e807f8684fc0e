//! TCP front end: one [`Session`] per accepted connection.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::LintConfig;
use crate::kernel::Kernel;
use crate::session::Session;
use crate::transport::framed;

/// Produces a fresh kernel for each new session.
pub type KernelFactory = Arc<dyn Fn() -> Box<dyn Kernel> + Send + Sync>;

pub struct Server {
    listener: TcpListener,
    lint: LintConfig,
    factory: KernelFactory,
}

impl Server {
    pub async fn bind(addr: &str, lint: LintConfig, factory: KernelFactory) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        Ok(Self {
            listener,
            lint,
            factory,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Sessions still open at shutdown are aborted; their kernels are
    /// dropped with them.
    pub async fn serve_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut sessions = JoinSet::new();
        let mut next_session = 0_u64;

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!(open_sessions = sessions.len(), "Shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        next_session += 1;
                        let session = Session::new(next_session, (self.factory)(), self.lint);
                        let span = info_span!("connection", session = next_session, %peer);
                        sessions.spawn(handle_connection(session, stream).instrument(span));
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Session task failed");
                    }
                }
            }
        }

        sessions.shutdown().await;
        Ok(())
    }
}

async fn handle_connection(mut session: Session, stream: TcpStream) {
    info!("Client connected");
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }
    let (reader, writer) = framed(stream);
    // Session::run logs its own outcome.
    let _ = session.run(reader, writer).await;
}

/// Write the bound port so a launcher can find the server.
pub async fn write_port_file(path: &Path, port: u16) -> Result<()> {
    tokio::fs::write(path, port.to_string())
        .await
        .with_context(|| format!("Failed to write port file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;
    use crate::client::WorksheetClient;
    use crate::kernel::ScriptKernel;
    use crate::transport::Message;

    fn script_factory() -> KernelFactory {
        Arc::new(|| -> Box<dyn Kernel> { Box::new(ScriptKernel::new()) })
    }

    #[tokio::test]
    async fn sessions_over_tcp_are_isolated() {
        let server = Server::bind("127.0.0.1:0", LintConfig::default(), script_factory())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let serving = tokio::spawn(server.serve_until(async {
            let _ = stopped.await;
        }));

        let mut first = WorksheetClient::connect(addr).await.unwrap();
        first.execute("x = 2").await.unwrap();
        let out = first.execute("x * 21").await.unwrap();
        assert_eq!(out.stdout, "42\n");
        assert_eq!(out.terminal, Message::Done { id: 2 });

        let mut second = WorksheetClient::connect(addr).await.unwrap();
        let out = second.execute("x").await.unwrap();
        assert!(out.stderr.contains("NameError"));

        stop.send(()).unwrap();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn lint_config_is_applied_to_sessions() {
        let lint = LintConfig {
            smart_quotes: true,
            implicit_multiplication: false,
        };
        let server = Server::bind("127.0.0.1:0", lint, script_factory())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let serving = tokio::spawn(server.serve_until(std::future::pending()));

        let mut client = WorksheetClient::connect(addr).await.unwrap();
        let out = client.execute("3x").await.unwrap();
        assert!(!out.stderr.contains("implicit multiplication"));
        assert!(out.stderr.contains("SyntaxError"));

        serving.abort();
    }

    #[tokio::test]
    async fn port_file_holds_the_port() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worksheet.port");
        write_port_file(&path, 40123).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "40123");
    }
}
