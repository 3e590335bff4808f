mod conversations;
mod messages;
mod profiles;
mod users;

pub use conversations::canonical_pair;
pub use messages::ReadReceipt;
pub use profiles::{CASCADE_ORDER, DeleteOutcome, ProfileWrite};
pub use users::UpsertOutcome;

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> anyhow::Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> anyhow::Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
