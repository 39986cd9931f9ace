pub mod domain;
pub mod error;
pub mod memory;
pub mod ports;
pub mod services;
pub mod workers;

pub use domain::{Caller, Money, Role};
pub use error::{ErrorKind, ServiceError, ServiceResult};
pub use ports::{
    Clock, DocumentRepository, DocumentTypeRepository, DriverDirectory, IdGenerator,
    OcrJobRepository, OcrProcessor, PaymentProcessor, PlanRepository, PortError, PortResult,
    RideSpendReader, SessionStore, Storage, SubscriptionRepository,
};
pub use services::{DocumentService, SubscriptionService};
