use std::sync::Arc;

use crate::config::Config;
use crate::publish::{PublishError, Publisher};
use crate::store::{CollectionStore, FileStore};
use crate::uploads::UploadManager;

/// Shared by every handler. Holds no collection data; each request goes to
/// the store on its own.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn CollectionStore>,
    pub uploads: Arc<UploadManager>,
    pub publisher: Arc<Publisher>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, PublishError> {
        let store = Arc::new(FileStore::new(config.data_dir()));
        Self::with_store(config, store)
    }

    pub fn with_store(
        config: Config,
        store: Arc<dyn CollectionStore>,
    ) -> Result<Self, PublishError> {
        let uploads = UploadManager::new(&config.public_dir)
            .with_limits(config.image_limit, config.document_limit);
        let publisher = Publisher::new(&config)?;

        Ok(AppState {
            config: Arc::new(config),
            store,
            uploads: Arc::new(uploads),
            publisher: Arc::new(publisher),
        })
    }
}
