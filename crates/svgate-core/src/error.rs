pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("markup has no root <svg> element")]
    MissingRoot,

    #[error("failed to rewrite markup: {message}")]
    Rewrite { message: String },
}
