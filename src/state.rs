use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::client::AnalysisClient;
use crate::options::Connection;
use crate::orchestrator::Orchestrator;
use crate::session::persist::SessionStore;
use crate::session::Session;

pub struct AppState {
    pub session: Arc<Session>,
    pub orchestrator: Arc<Orchestrator>,
    pub client: Arc<AnalysisClient>,
}

impl AppState {
    /// Wire up storage, the HTTP client and the orchestrator from the environment.
    pub async fn init() -> Result<Self> {
        let data_dir = PathBuf::from(
            dotenv::var("PAPER_LENS_DATA_DIR").unwrap_or_else(|_| "./data/session".to_string()),
        );
        let store = Arc::new(SessionStore::new(&data_dir).await?);
        info!("Session store initialized at {:?}", data_dir);

        let client = Arc::new(AnalysisClient::from_env()?);
        let connection = Connection::from_env();
        if connection.validate().is_ok() {
            info!(model = %connection.model, "Model connection configured");
        }

        let session = Arc::new(Session::default());
        let orchestrator = Arc::new(
            Orchestrator::new(session.clone(), client.clone(), connection).with_store(store),
        );

        Ok(Self {
            session,
            orchestrator,
            client,
        })
    }
}
