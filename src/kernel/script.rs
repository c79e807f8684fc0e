//! Built-in scripting kernel.

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::eval::{run_cell, Environment};
use super::{CancelFlag, ErrorKind, ExecutionError, Kernel, OutputSender};

/// Kernel running the built-in scripting language.
///
/// Each cell runs on a blocking thread. The environment is moved onto that
/// thread for the duration of the cell and moved back afterwards.
#[derive(Debug, Default)]
pub struct ScriptKernel {
    env: Option<Environment>,
}

impl ScriptKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bindings accumulated so far.
    pub fn environment(&self) -> Option<&Environment> {
        self.env.as_ref()
    }
}

#[async_trait]
impl Kernel for ScriptKernel {
    #[instrument(skip(self, code, output, cancel), fields(code_len = code.len()))]
    async fn execute(
        &mut self,
        code: &str,
        output: OutputSender,
        cancel: CancelFlag,
    ) -> Result<(), ExecutionError> {
        let mut env = self.env.take().unwrap_or_default();
        let source = code.to_string();

        let joined = tokio::task::spawn_blocking(move || {
            let result = run_cell(&mut env, &source, &output, &cancel);
            (env, result)
        })
        .await;

        match joined {
            Ok((env, result)) => {
                debug!(bindings = env.len(), ok = result.is_ok(), "Cell finished");
                self.env = Some(env);
                result
            }
            Err(e) => {
                // The environment went down with the thread.
                warn!(error = %e, "Kernel thread failed; bindings reset");
                self.env = Some(Environment::new());
                Err(ExecutionError::new(
                    ErrorKind::InternalError,
                    format!("kernel thread failed: {e}"),
                    (1, 1),
                ))
            }
        }
    }
}
