//! Listener lifecycle

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use grantcraft_coordinator::{AllowanceQueries, RequestCoordinator};
use grantcraft_ledger::{Ledger, LedgerClient};
use grantcraft_settings::Settings;
use grantcraft_store::RecordStore;

use crate::{router, AppState, Authenticator, JwtAuthenticator, Result, ServerError};

pub struct GrantServer {
    listen_addr: SocketAddr,
    state: AppState,
}

impl GrantServer {
    pub fn new(
        settings: &Settings,
        store: Arc<dyn RecordStore>,
        ledger: Arc<dyn Ledger>,
        auth: Arc<dyn Authenticator>,
    ) -> Result<Self> {
        let listen_addr = settings
            .server
            .listen_addr
            .parse()
            .map_err(|_| ServerError::InvalidAddress(settings.server.listen_addr.clone()))?;
        let coordinator = RequestCoordinator::new(settings, store.clone(), ledger.clone())?;

        Ok(Self {
            listen_addr,
            state: AppState {
                coordinator: Arc::new(coordinator),
                queries: Arc::new(AllowanceQueries::new(ledger, store)),
                auth,
                mode: settings.ledger.mode,
            },
        })
    }

    /// Server backed by the ledger client and JWT secret named in `settings`
    pub fn from_settings(settings: &Settings, store: Arc<dyn RecordStore>) -> Result<Self> {
        if settings.auth.jwt_secret.is_empty() {
            warn!("auth.jwt_secret is empty; tokens are signed with an empty key");
        }
        let ledger = Arc::new(LedgerClient::new(settings.ledger.client_config()));
        let auth = Arc::new(JwtAuthenticator::new(settings.auth.jwt_secret.as_bytes()));
        Self::new(settings, store, ledger, auth)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        Ok(TcpListener::bind(self.listen_addr).await?)
    }

    /// Serve on `listener` until `shutdown` resolves, then wait for in-flight
    /// settlements.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let executor = self.state.coordinator.executor().clone();
        info!(
            "Serving on {} ({} ledger)",
            listener.local_addr()?,
            self.state.mode.as_str()
        );

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Listener closed, draining {} settlements", executor.in_flight().await);
        executor.drain().await;
        Ok(())
    }

    /// Bind the configured address and serve until ctrl-c
    pub async fn run(self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await
    }
}
