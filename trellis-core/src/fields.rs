//! Field selection for node responses.

use crate::Error;

/// The attribute groups a client may request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryField {
    Metadata,
    StructureFamily,
    Structure,
    Specs,
    Sorting,
    Count,
    AccessBlob,
    DataSources,
}

impl EntryField {
    pub fn parse(text: &str) -> Result<Option<Self>, Error> {
        match text {
            "metadata" => Ok(Some(EntryField::Metadata)),
            "structure_family" => Ok(Some(EntryField::StructureFamily)),
            "structure" => Ok(Some(EntryField::Structure)),
            "specs" => Ok(Some(EntryField::Specs)),
            "sorting" => Ok(Some(EntryField::Sorting)),
            "count" => Ok(Some(EntryField::Count)),
            "access_blob" => Ok(Some(EntryField::AccessBlob)),
            "data_sources" => Ok(Some(EntryField::DataSources)),
            // `none` (or an empty value) requests keys only.
            "none" | "" => Ok(None),
            other => Err(Error::BadRequest(format!("unknown field: {other}"))),
        }
    }
}

/// A set of requested fields. `All` when the client sent none;
/// `Only([])` when the client explicitly asked for keys only.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldSelection {
    All,
    Only(Vec<EntryField>),
}

impl FieldSelection {
    /// Parse repeated `fields=` values.
    pub fn parse(values: &[String]) -> Result<Self, Error> {
        if values.is_empty() {
            return Ok(FieldSelection::All);
        }
        let mut fields = Vec::new();
        for value in values {
            if let Some(field) = EntryField::parse(value)? {
                fields.push(field);
            }
        }
        Ok(FieldSelection::Only(fields))
    }

    pub fn includes(&self, field: EntryField) -> bool {
        match self {
            FieldSelection::All => true,
            FieldSelection::Only(fields) => fields.contains(&field),
        }
    }

    /// `count` alone permits skipping child attribute fetches entirely.
    pub fn count_only(&self) -> bool {
        matches!(self, FieldSelection::Only(fields)
            if fields.len() == 1 && fields[0] == EntryField::Count)
    }

    pub fn keys_only(&self) -> bool {
        matches!(self, FieldSelection::Only(fields) if fields.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_query() {
        let selection =
            FieldSelection::parse(&["metadata".to_string(), "specs".to_string()]).unwrap();
        assert!(selection.includes(EntryField::Metadata));
        assert!(!selection.includes(EntryField::Structure));

        assert_eq!(FieldSelection::parse(&[]).unwrap(), FieldSelection::All);
        assert!(FieldSelection::parse(&["none".to_string()])
            .unwrap()
            .keys_only());
        assert!(FieldSelection::parse(&["count".to_string()])
            .unwrap()
            .count_only());
        assert!(FieldSelection::parse(&["bogus".to_string()]).is_err());
    }
}
