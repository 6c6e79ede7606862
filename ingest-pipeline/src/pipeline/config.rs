#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub embedding_context_window: usize,
    pub qntm_batch_concurrency: usize,
    pub default_consolidation_level: u8,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            embedding_context_window: 8_192,
            qntm_batch_concurrency: 8,
            default_consolidation_level: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
    pub recursive: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            tuning: IngestionTuning::default(),
            recursive: false,
        }
    }
}
