//! Dashboard web server: an HTML shell plus the JSON views it renders.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::ApiError;
pub use handlers::{
    ChartSeries, DashboardView, ForecastRequest, DASHBOARD_TITLE, MAX_HORIZON, PROMPT_MESSAGE,
};
pub use routes::create_router;
pub use state::{AppState, DashboardError};

use crate::config::DashboardSettings;
use std::future::Future;
use std::sync::Arc;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server host address (default: "127.0.0.1")
    pub host: String,
    /// Server port (default: 8050)
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig::from(&DashboardSettings::default())
    }
}

impl From<&DashboardSettings> for ServerConfig {
    fn from(settings: &DashboardSettings) -> Self {
        ServerConfig {
            host: settings.host.clone(),
            port: settings.port,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Serves the dashboard until `shutdown` resolves.
///
/// # Example
/// ```rust,no_run
/// use energy_forecast::config::Settings;
/// use energy_forecast::secrets::EnvSecretStore;
/// use energy_forecast::server::{run_server, AppState, ServerConfig};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let settings = Settings::load(None)?;
///     let state = AppState::from_settings(&settings, Arc::new(EnvSecretStore::new()))?;
///     run_server(ServerConfig::from(&settings.dashboard), state, async {
///         let _ = tokio::signal::ctrl_c().await;
///     })
///     .await?;
///     Ok(())
/// }
/// ```
pub async fn run_server<F>(
    config: ServerConfig,
    state: AppState,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(Arc::new(state));

    let addr = config.address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Dashboard listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
