//! Page bindings: where an experiment is exposed.
//!
//! Page-targeting CRUD lives outside this crate. The lifecycle core only
//! needs one operation: erasing an experiment's page data when it reaches
//! TERMINATED or DELETED, so terminated experiments stop appearing on any
//! page.

use async_trait::async_trait;
use std::sync::Mutex;

use switchyard_core::{ApplicationName, ExperimentId, UserInfo};

use crate::store::RepositoryError;

/// Page-binding maintenance consumed by the lifecycle core.
#[async_trait]
pub trait Pages: Send + Sync {
    /// Removes every (page, experiment) binding of the experiment.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn erase_page_data(
        &self,
        application: &ApplicationName,
        id: ExperimentId,
        user: &UserInfo,
    ) -> Result<(), RepositoryError>;
}

/// In-memory [`Pages`] that records erase calls for assertions.
#[derive(Debug, Default)]
pub struct MemoryPages {
    erased: Mutex<Vec<(ApplicationName, ExperimentId)>>,
}

impl MemoryPages {
    /// Creates an empty page binder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the (application, experiment) pairs erased so far.
    #[must_use]
    pub fn erased(&self) -> Vec<(ApplicationName, ExperimentId)> {
        self.erased
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Pages for MemoryPages {
    async fn erase_page_data(
        &self,
        application: &ApplicationName,
        id: ExperimentId,
        _user: &UserInfo,
    ) -> Result<(), RepositoryError> {
        if let Ok(mut guard) = self.erased.lock() {
            guard.push((application.clone(), id));
        }
        Ok(())
    }
}
