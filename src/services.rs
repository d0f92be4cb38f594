pub mod chart_service;
pub mod ingest_service;
pub mod observation_service;

pub use chart_service::{ChartError, ChartService};
pub use ingest_service::{
    IngestError, IngestService, IngestSettings, IngestionReport, IngestionRequest,
};
pub use observation_service::ObservationService;
