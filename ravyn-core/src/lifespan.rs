//! Startup and shutdown hooks, and the ASGI lifespan protocol.

use crate::asgi::{Message, Receive, Sender};
use crate::logging::{debug, error, info};
use crate::Error;
use futures_util::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type HookFn = dyn Fn() -> BoxFuture<'static, Result<(), Error>> + Send + Sync;

/// An async callback run on application startup or shutdown.
#[derive(Clone)]
pub struct LifespanHook {
    name: String,
    func: Arc<HookFn>,
}

impl LifespanHook {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move || Box::pin(func())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(&self) -> Result<(), Error> {
        (self.func)().await
    }
}

impl fmt::Debug for LifespanHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifespanHook").field("name", &self.name).finish()
    }
}

/// Run hooks in declaration order, stopping at the first failure.
pub async fn run_hooks(phase: &str, hooks: &[LifespanHook]) -> Result<(), Error> {
    for hook in hooks {
        debug!(phase, hook = %hook.name, "Running lifespan hook");
        hook.run().await.inspect_err(|e| {
            error!(phase, hook = %hook.name, error = %e, "Lifespan hook failed");
        })?;
    }
    Ok(())
}

/// Something with startup and shutdown phases.
#[async_trait::async_trait]
pub trait Lifespan: Send + Sync {
    async fn startup(&self) -> Result<(), Error>;
    async fn shutdown(&self) -> Result<(), Error>;
}

/// Drive the lifespan protocol until the shutdown message has been answered
/// or the server goes away.
pub async fn serve_lifespan<L: Lifespan + ?Sized>(
    target: &L,
    receive: Receive,
    send: Sender,
) -> Result<(), Error> {
    loop {
        match receive.recv().await {
            Message::LifespanStartup => match target.startup().await {
                Ok(()) => {
                    info!("Application startup complete");
                    send.send(Message::LifespanStartupComplete).await?;
                }
                Err(e) => {
                    send.send(Message::LifespanStartupFailed {
                        message: e.to_string(),
                    })
                    .await?;
                    return Err(e);
                }
            },
            Message::LifespanShutdown => {
                match target.shutdown().await {
                    Ok(()) => {
                        info!("Application shutdown complete");
                        send.send(Message::LifespanShutdownComplete).await?;
                    }
                    Err(e) => {
                        send.send(Message::LifespanShutdownFailed {
                            message: e.to_string(),
                        })
                        .await?;
                    }
                }
                return Ok(());
            }
            Message::Disconnect { .. } => return Ok(()),
            _ => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct Counting {
        started: AtomicUsize,
        stopped: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Lifespan for Counting {
        async fn startup(&self) -> Result<(), Error> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), Error> {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_run_hooks_stops_at_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let first = calls.clone();
        let hooks = vec![
            LifespanHook::new("fail", || async { Err(Error::Internal("boom".into())) }),
            LifespanHook::new("never", move || {
                let first = first.clone();
                async move {
                    first.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        ];
        assert!(run_hooks("startup", &hooks).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lifespan_protocol() {
        let target = Counting {
            started: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
        };
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        in_tx.send(Message::LifespanStartup).unwrap();
        in_tx.send(Message::LifespanShutdown).unwrap();

        serve_lifespan(&target, Receive::from_channel(in_rx), Sender::from_channel(out_tx))
            .await
            .unwrap();

        assert_eq!(out_rx.recv().await, Some(Message::LifespanStartupComplete));
        assert_eq!(out_rx.recv().await, Some(Message::LifespanShutdownComplete));
        assert_eq!(target.started.load(Ordering::SeqCst), 1);
        assert_eq!(target.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hook_runs_outside_a_runtime() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let hook = LifespanHook::new("warm", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        assert_eq!(hook.name(), "warm");
        tokio_test::block_on(hook.run()).unwrap();
        tokio_test::block_on(run_hooks("startup", &[hook.clone(), hook])).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
