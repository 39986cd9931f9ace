pub mod db;
pub mod ocr;
pub mod payment;
pub mod storage;

pub use db::PgRepository;
pub use ocr::{AwsCredentials, FieldExtractor, GoogleVisionOcr, TextractOcr};
pub use payment::HttpPaymentGateway;
pub use storage::LocalStorage;
