//! Command Implementations
//!
//! Each command builds (or looks up) one pool through the registry and
//! prints its result. A command returns a failure exit code when the pool
//! answered but the answer was a failure; `Err` is reserved for problems
//! running the command at all.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use modelpool_core::{
    build_strategy, DispatchRequest, EnvSecretDecryptor, HealthSeed, OpenAiCompatTransport,
    PoolDispatcher, PoolFactory, PoolFile, PoolRegistry, StaticConfigSource, StreamChunk,
};

use crate::RequestArgs;

/// Shape of `modelpool health --export`
#[derive(Serialize)]
struct SeedExport {
    health_seeds: Vec<HealthSeed>,
}

/// Everything a command needs
pub struct App {
    registry: PoolRegistry,
    timeout: Duration,
}

impl App {
    /// Wire the pool file to the HTTP transport
    pub fn new(file: PoolFile, timeout: Duration) -> Result<Self> {
        let health = file.health.clone();
        let transport = OpenAiCompatTransport::new().context("Failed to create HTTP client")?;

        let factory = PoolFactory::new(
            Arc::new(StaticConfigSource::new(file)),
            Arc::new(EnvSecretDecryptor),
            Arc::new(transport),
        )
        .with_health_config(health);

        Ok(Self {
            registry: PoolRegistry::new(factory),
            timeout,
        })
    }

    async fn pool(&self, name: &str) -> Result<Arc<PoolDispatcher>> {
        self.registry
            .get_or_build(name)
            .await
            .with_context(|| format!("Failed to build pool {name}"))
    }

    /// The pool, with the strategy replaced when the request asks for one
    async fn pool_for(&self, args: &RequestArgs) -> Result<Arc<PoolDispatcher>> {
        let Some(kind) = args.strategy else {
            return self.pool(&args.pool).await;
        };

        let pool = self
            .registry
            .factory()
            .build(&args.pool)
            .await
            .with_context(|| format!("Failed to build pool {}", args.pool))?;
        let cap = pool.config().race_max_concurrency;
        info!(pool = %args.pool, strategy = %kind, "Strategy overridden");
        Ok(Arc::new(pool.with_strategy(build_strategy(kind, cap))))
    }

    fn request(&self, args: &RequestArgs) -> Result<DispatchRequest> {
        let request = match (&args.body, &args.prompt) {
            (Some(path), _) => DispatchRequest::new(args.model_type, read_body(path)?),
            (None, Some(prompt)) => {
                let mut request = DispatchRequest::chat(prompt.as_str());
                request.model_type = args.model_type;
                request
            }
            (None, None) => anyhow::bail!("either --prompt or --body is required"),
        };

        let request = request.with_timeout(self.timeout);
        Ok(match &args.request_id {
            Some(id) => request.with_request_id(id.as_str()),
            None => request,
        })
    }

    /// `modelpool dispatch`
    pub async fn dispatch(&self, args: &RequestArgs, cancel: &CancellationToken) -> Result<ExitCode> {
        let pool = self.pool_for(args).await?;
        let request = self.request(args)?;

        let response = pool.dispatch_with_cancel(request, cancel).await;
        print_json(&response)?;

        Ok(exit_code(response.success))
    }

    /// `modelpool stream`
    pub async fn stream(
        &self,
        args: &RequestArgs,
        json: bool,
        cancel: &CancellationToken,
    ) -> Result<ExitCode> {
        let pool = self.pool_for(args).await?;
        let request = self.request(args)?;

        let mut stream = pool.dispatch_stream_with_cancel(request, cancel);
        let mut stdout = std::io::stdout().lock();
        let mut success = false;

        while let Some(chunk) = stream.next().await {
            if json {
                writeln!(stdout, "{}", serde_json::to_string(&chunk)?)?;
                success = matches!(chunk, StreamChunk::Done { .. });
                continue;
            }

            match chunk {
                StreamChunk::Start { endpoint, .. } => {
                    info!(endpoint = %endpoint.endpoint_id, "Streaming");
                }
                StreamChunk::Text { content } => {
                    write!(stdout, "{content}")?;
                    stdout.flush()?;
                }
                StreamChunk::Done { usage, .. } => {
                    writeln!(stdout)?;
                    if let Some(usage) = usage {
                        info!(
                            input_tokens = usage.input_tokens,
                            output_tokens = usage.output_tokens,
                            "Stream finished"
                        );
                    }
                    success = true;
                }
                StreamChunk::Error { code, message } => {
                    writeln!(stdout)?;
                    eprintln!("error [{code}]: {message}");
                }
            }
        }

        Ok(exit_code(success))
    }

    /// `modelpool test`
    pub async fn test(
        &self,
        pool: &str,
        endpoint: Option<&str>,
        prompt: Option<String>,
    ) -> Result<ExitCode> {
        let pool = self.pool(pool).await?;
        let request = prompt.map(|p| DispatchRequest::chat(p).with_timeout(self.timeout));

        let results = pool.test_endpoints(endpoint, request).await;
        if results.is_empty() {
            warn!(pool = %pool.name(), endpoint = ?endpoint, "Nothing to probe");
        }
        print_json(&results)?;

        Ok(exit_code(!results.is_empty() && results.iter().all(|r| r.success)))
    }

    /// `modelpool health`
    pub async fn health(&self, pool: &str, probe: bool, export: bool) -> Result<ExitCode> {
        let pool = self.pool(pool).await?;
        if probe {
            pool.test_endpoints(None, None).await;
        }

        if export {
            let export = SeedExport {
                health_seeds: pool.export_health(),
            };
            print!("{}", toml::to_string(&export)?);
        } else {
            print_json(&pool.health_snapshot())?;
        }
        Ok(ExitCode::SUCCESS)
    }

    /// `modelpool pools`
    pub async fn pools(&self) -> Result<ExitCode> {
        let source = self.registry.factory().source();
        let names = source.group_names().await?;
        if names.is_empty() {
            eprintln!("No pools configured");
            return Ok(ExitCode::SUCCESS);
        }

        for name in names {
            if let Some(group) = source.model_group(&name).await? {
                println!(
                    "{:<24} {:<16} {} model(s)",
                    group.name,
                    group.strategy.as_str(),
                    group.models.len()
                );
            }
        }
        Ok(ExitCode::SUCCESS)
    }
}

fn read_body(path: &Path) -> Result<serde_json::Value> {
    let text = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("Failed to read body from stdin")?
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read body file: {}", path.display()))?
    };
    serde_json::from_str(&text).context("Request body is not valid JSON")
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
