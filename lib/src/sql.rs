use std::path::Path;

use tracing::warn;

use crate::{
    error::{Error, Result},
    index::ImageId,
    Signature,
};

/// Blob store keeping one encoded signature per image id.
pub struct SqlDB {
    connection: sqlite::Connection,
}

impl SqlDB {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(sqlite::open(path)?)
    }

    pub fn new(connection: sqlite::Connection) -> Result<Self> {
        let create = "
        CREATE TABLE IF NOT EXISTS 'signatures'
        (
            'id' INTEGER PRIMARY KEY NOT NULL ,
            'sig' BLOB NOT NULL
        )";
        connection.execute(create)?;
        Ok(Self { connection })
    }

    /// Every stored row. Rows that fail to decode are handed back as errors
    /// so the caller can recompute or drop them.
    pub fn load(&self) -> Result<Vec<(ImageId, Result<Signature>)>> {
        let query = "SELECT id, sig FROM signatures";
        let mut rows = Vec::new();
        for row in self.connection.prepare(query)?.into_iter() {
            let values: Vec<sqlite::Value> = row?.into();
            let (id, signature) = parse(values)?;
            if let Err(error) = &signature {
                warn!(id, %error, "stored signature does not decode");
            }
            rows.push((id, signature));
        }
        Ok(rows)
    }

    pub fn get(&self, id: ImageId) -> Result<Option<Signature>> {
        let query = "SELECT id, sig FROM signatures WHERE id = ?";
        let mut statement = self.connection.prepare(query)?;
        statement.bind((1, id as i64))?;
        let Some(row) = statement.into_iter().next() else {
            return Ok(None);
        };
        let values: Vec<sqlite::Value> = row?.into();
        let (_, signature) = parse(values)?;
        signature.map(Some)
    }

    /// Stores `signature`, replacing any earlier blob for `id`.
    pub fn insert(&self, id: ImageId, signature: &Signature) -> Result<()> {
        let query = "INSERT OR REPLACE INTO signatures (id, sig) VALUES (:id, :sig)";
        let mut statement = self.connection.prepare(query)?;
        statement.bind::<&[(_, sqlite::Value)]>(
            &[
                (":id", (id as i64).into()),
                (":sig", signature.encode().into()),
            ][..],
        )?;
        if let Some(Err(error)) = statement.into_iter().next() {
            return Err(error.into());
        }
        Ok(())
    }

    /// Returns whether a row existed.
    pub fn delete(&self, id: ImageId) -> Result<bool> {
        let query = "DELETE FROM signatures WHERE id = ? RETURNING id";
        let mut statement = self.connection.prepare(query)?;
        statement.bind((1, id as i64))?;
        let mut deleted = false;
        for row in statement.into_iter() {
            row?;
            deleted = true;
        }
        Ok(deleted)
    }
}

fn parse(values: Vec<sqlite::Value>) -> Result<(ImageId, Result<Signature>)> {
    use sqlite::Value::*;
    match values.as_slice() {
        [Integer(id), Binary(sig)] => Ok((*id as ImageId, Signature::decode(sig))),
        [Integer(id), _] => Ok((
            *id as ImageId,
            Err(Error::CorruptSignature("sig column is not a blob".to_string())),
        )),
        _ => Err(Error::CorruptSignature(format!(
            "unexpected row shape ({} columns)",
            values.len()
        ))),
    }
}
