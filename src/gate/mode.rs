//! Application lifecycle mode and the bootstrap transition.
//!
//! The mode and the live configuration sit behind one `RwLock`. Transitions
//! hold the write guard from the mode check through save, reinitialize and
//! publish, so no reader observes a new mode before dependents have been
//! reinitialized.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use super::{
    error::{GateError, StoreError},
    guard::ensure_mode,
    session::Session,
    store::{
        ConfigurationStore, StoredConfiguration, Template, PROPERTY_CONFIG_IS_EDITABLE,
        PROPERTY_TEMPLATE,
    },
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationMode {
    /// Nothing persisted yet.
    New,
    /// Persisted but still editable.
    Configuration,
    Running,
}

impl ApplicationMode {
    #[must_use]
    pub fn of(configuration: Option<&StoredConfiguration>) -> Self {
        match configuration {
            None => Self::New,
            Some(configuration) if configuration.is_editable() => Self::Configuration,
            Some(_) => Self::Running,
        }
    }
}

/// Result of accepting an uploaded configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UploadOutcome {
    /// Held in the session for review; nothing persisted.
    StagedForReview,
    /// Persisted and reinitialized; expect a short unavailability window.
    Restarting,
}

struct ModeState {
    mode: ApplicationMode,
    configuration: Option<Arc<StoredConfiguration>>,
}

pub struct ApplicationModeController {
    state: RwLock<ModeState>,
    store: Arc<dyn ConfigurationStore>,
    publisher: watch::Sender<Option<Arc<StoredConfiguration>>>,
}

impl ApplicationModeController {
    /// Load the persisted configuration and derive the starting mode.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn open(store: Arc<dyn ConfigurationStore>) -> Result<Self, StoreError> {
        let configuration = store.load().await?.map(Arc::new);
        let mode = ApplicationMode::of(configuration.as_deref());
        info!(?mode, "application mode loaded");
        let (publisher, _) = watch::channel(configuration.clone());
        Ok(Self {
            state: RwLock::new(ModeState {
                mode,
                configuration,
            }),
            store,
            publisher,
        })
    }

    pub async fn mode(&self) -> ApplicationMode {
        self.state.read().await.mode
    }

    pub async fn configuration(&self) -> Option<Arc<StoredConfiguration>> {
        self.state.read().await.configuration.clone()
    }

    /// Receive every configuration that becomes live.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<StoredConfiguration>>> {
        self.publisher.subscribe()
    }

    /// Seed, persist and activate a configuration from a known template.
    ///
    /// # Errors
    /// `Unauthorized` outside `New` (whatever the template), `ConfigFormat`
    /// for an unknown template, `Store` when persistence or reinitialization
    /// fails.
    #[instrument(skip(self))]
    pub async fn select_initial_template(
        &self,
        template_id: &str,
    ) -> Result<ApplicationMode, GateError> {
        let mut state = self.state.write().await;
        ensure_mode(state.mode, &[ApplicationMode::New])?;
        let template: Template = template_id.parse()?;

        let mut configuration = self.store.default_configuration(template);
        configuration.set_property(PROPERTY_TEMPLATE, template.as_str());
        configuration.set_property(PROPERTY_CONFIG_IS_EDITABLE, "true");

        self.persist_and_reinitialize(&mut state, configuration)
            .await
    }

    /// Accept a configuration decoded from an upload.
    ///
    /// While running the upload only replaces the session's draft. In any
    /// other mode it is persisted and activated immediately.
    ///
    /// # Errors
    /// Returns `Store` when persistence or reinitialization fails.
    #[instrument(skip_all)]
    pub async fn accept_uploaded_configuration(
        &self,
        session: &mut Session,
        configuration: StoredConfiguration,
    ) -> Result<UploadOutcome, GateError> {
        if self.mode().await == ApplicationMode::Running {
            session.stage_configuration(configuration);
            return Ok(UploadOutcome::StagedForReview);
        }

        let mut state = self.state.write().await;
        // Another bootstrap upload may have finished while we waited.
        if state.mode == ApplicationMode::Running {
            session.stage_configuration(configuration);
            return Ok(UploadOutcome::StagedForReview);
        }
        self.persist_and_reinitialize(&mut state, configuration)
            .await?;
        Ok(UploadOutcome::Restarting)
    }

    async fn persist_and_reinitialize(
        &self,
        state: &mut ModeState,
        configuration: StoredConfiguration,
    ) -> Result<ApplicationMode, GateError> {
        if let Err(err) = self.store.save(&configuration).await {
            warn!("failed to save configuration: {err}");
            return Err(err.into());
        }
        if let Err(err) = self.store.reinitialize().await {
            warn!("configuration saved but reinitialization failed: {err}");
            return Err(err.into());
        }

        let configuration = Arc::new(configuration);
        let previous = state.mode;
        state.mode = ApplicationMode::of(Some(configuration.as_ref()));
        state.configuration = Some(Arc::clone(&configuration));
        self.publisher.send_replace(Some(configuration));
        info!(?previous, mode = ?state.mode, "application mode transition complete");
        Ok(state.mode)
    }
}
