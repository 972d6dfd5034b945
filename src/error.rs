use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("OpenCV Error: {0}")]
    OpenCv(#[from] opencv::Error),
}
