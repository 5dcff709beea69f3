use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::classifier::{Classifier, ClassifierError, Diagnosis};

/// Anything that can turn an uploaded image into a diagnosis.
pub trait DiseasePredictor: Send + Sync {
    fn diagnose(&self, image: &[u8]) -> Result<Diagnosis, ClassifierError>;
}

impl DiseasePredictor for Classifier {
    fn diagnose(&self, image: &[u8]) -> Result<Diagnosis, ClassifierError> {
        Classifier::diagnose(self, image)
    }
}

pub type SharedPredictor = Arc<dyn DiseasePredictor>;
type Loader = Arc<dyn Fn() -> Result<SharedPredictor, ClassifierError> + Send + Sync>;

/// Holds the process-wide model, loading it at most once.
///
/// A failed load leaves the slot empty, so the next caller tries again.
#[derive(Clone)]
pub struct ModelSlot {
    cell: Arc<OnceCell<SharedPredictor>>,
    loader: Loader,
}

impl ModelSlot {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<SharedPredictor, ClassifierError> + Send + Sync + 'static,
    {
        Self {
            cell: Arc::new(OnceCell::new()),
            loader: Arc::new(loader),
        }
    }

    /// A slot that is already filled.
    pub fn ready(predictor: SharedPredictor) -> Self {
        Self {
            cell: Arc::new(OnceCell::new_with(Some(predictor))),
            loader: Arc::new(|| Err(ClassifierError::ModelError("Model slot has no loader".into()))),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// Returns the model, loading it on the blocking pool if needed.
    pub async fn get(&self) -> Result<SharedPredictor, ClassifierError> {
        let predictor = self.cell
            .get_or_try_init(|| async {
                let loader = Arc::clone(&self.loader);
                log::info!("Loading model...");
                let predictor = tokio::task::spawn_blocking(move || loader())
                    .await
                    .map_err(|e| ClassifierError::ModelError(format!("Model loading task failed: {}", e)))??;
                log::info!("Model loaded");
                Ok::<_, ClassifierError>(predictor)
            })
            .await?;
        Ok(Arc::clone(predictor))
    }
}

/// State shared by all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub models: ModelSlot,
}

impl AppState {
    pub fn new(models: ModelSlot) -> Self {
        Self { models }
    }
}
