//! Relationship descriptors attached to fields

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Kind of relationship between two metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipKind {
    /// Target records point at this record (one)
    HasOne,
    /// Target records point at this record (many)
    HasMany,
    /// This record points at one target record
    RefOne,
    /// Many-to-many through an intermediate metadata
    RefMany,
}

impl RelationshipKind {
    /// Returns true if this relationship resolves to a collection
    pub fn is_collection(self) -> bool {
        matches!(self, Self::HasMany | Self::RefMany)
    }

    /// Returns true if this relationship goes through an intermediate metadata
    pub fn requires_intermediate(self) -> bool {
        matches!(self, Self::RefMany)
    }

    pub fn parse(kind: &str) -> ModelResult<Self> {
        match kind.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "HAS_ONE" | "HASONE" => Ok(Self::HasOne),
            "HAS_MANY" | "HASMANY" => Ok(Self::HasMany),
            "REF_ONE" | "REFONE" => Ok(Self::RefOne),
            "REF_MANY" | "REFMANY" => Ok(Self::RefMany),
            other => Err(ModelError::InvalidMetadata(format!(
                "unknown relationship kind '{}'",
                other
            ))),
        }
    }
}

/// Join metadata for many-to-many relationships
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intermediate {
    /// Name of the intermediate metadata
    pub metadata: String,
    /// Intermediate field holding the source record's local key
    pub source_key: String,
    /// Intermediate field holding the target record's key
    pub target_key: String,
}

/// Relationship declared on a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub kind: RelationshipKind,
    /// Target metadata name
    pub target: String,
    /// Field on the source record
    pub local_key: String,
    /// Field on the target record; for `RefMany` an empty value means the
    /// target's primary key
    pub foreign_key: String,
    pub intermediate: Option<Intermediate>,
}

impl Relationship {
    pub fn new(
        kind: RelationshipKind,
        target: impl Into<String>,
        local_key: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            target: target.into(),
            local_key: local_key.into(),
            foreign_key: foreign_key.into(),
            intermediate: None,
        }
    }

    pub fn has_one(target: &str, local_key: &str, foreign_key: &str) -> Self {
        Self::new(RelationshipKind::HasOne, target, local_key, foreign_key)
    }

    pub fn has_many(target: &str, local_key: &str, foreign_key: &str) -> Self {
        Self::new(RelationshipKind::HasMany, target, local_key, foreign_key)
    }

    pub fn ref_one(target: &str, local_key: &str, foreign_key: &str) -> Self {
        Self::new(RelationshipKind::RefOne, target, local_key, foreign_key)
    }

    pub fn ref_many(target: &str, local_key: &str, foreign_key: &str) -> Self {
        Self::new(RelationshipKind::RefMany, target, local_key, foreign_key)
    }

    /// Set the intermediate metadata of a many-to-many relationship
    pub fn through(mut self, metadata: &str, source_key: &str, target_key: &str) -> Self {
        self.intermediate = Some(Intermediate {
            metadata: metadata.to_string(),
            source_key: source_key.to_string(),
            target_key: target_key.to_string(),
        });
        self
    }

    /// Parse `KIND,Target,local,foreign[,Intermediate,source,target]`
    pub fn parse(raw: &str) -> ModelResult<Self> {
        let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
        if parts.len() < 4 {
            return Err(ModelError::InvalidMetadata(format!(
                "relationship '{}' needs at least kind, target, local and foreign keys",
                raw
            )));
        }
        let mut rel = Self::new(RelationshipKind::parse(parts[0])?, parts[1], parts[2], parts[3]);
        match parts.len() {
            4 => {}
            7 => rel = rel.through(parts[4], parts[5], parts[6]),
            _ => {
                return Err(ModelError::InvalidMetadata(format!(
                    "relationship '{}' has an incomplete intermediate section",
                    raw
                )))
            }
        }
        rel.validate()?;
        Ok(rel)
    }

    pub fn validate(&self) -> ModelResult<()> {
        if self.target.is_empty() {
            return Err(ModelError::InvalidMetadata(
                "relationship target cannot be empty".to_string(),
            ));
        }
        if self.local_key.is_empty() {
            return Err(ModelError::InvalidMetadata(format!(
                "relationship to '{}' has no local key",
                self.target
            )));
        }
        match (self.kind.requires_intermediate(), &self.intermediate) {
            (true, None) => Err(ModelError::InvalidMetadata(format!(
                "REF_MANY relationship to '{}' needs an intermediate metadata",
                self.target
            ))),
            (true, Some(inter)) if inter.metadata.is_empty()
                || inter.source_key.is_empty()
                || inter.target_key.is_empty() =>
            {
                Err(ModelError::InvalidMetadata(format!(
                    "intermediate of relationship to '{}' is incomplete",
                    self.target
                )))
            }
            (false, _) if self.foreign_key.is_empty() => Err(ModelError::InvalidMetadata(format!(
                "relationship to '{}' has no foreign key",
                self.target
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_has_many() {
        let rel = Relationship::parse("HAS_MANY,Post,ID,AuthorID").unwrap();
        assert_eq!(rel.kind, RelationshipKind::HasMany);
        assert_eq!(rel.target, "Post");
        assert_eq!(rel.local_key, "ID");
        assert_eq!(rel.foreign_key, "AuthorID");
        assert!(rel.kind.is_collection());
    }

    #[test]
    fn test_parse_ref_many_with_intermediate() {
        let rel = Relationship::parse("REF_MANY,Tag,ID,ID,PostTag,PostID,TagID").unwrap();
        let inter = rel.intermediate.unwrap();
        assert_eq!(inter.metadata, "PostTag");
        assert_eq!(inter.source_key, "PostID");
        assert_eq!(inter.target_key, "TagID");
    }

    #[test]
    fn test_ref_many_without_intermediate_is_invalid() {
        assert!(Relationship::parse("REF_MANY,Tag,ID,ID").is_err());
        assert!(Relationship::parse("REF_MANY,Tag,ID,ID,PostTag").is_err());
        assert!(Relationship::ref_many("Tag", "ID", "").validate().is_err());
        assert!(Relationship::ref_many("Tag", "ID", "")
            .through("PostTag", "PostID", "TagID")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_unknown_kind() {
        assert!(Relationship::parse("BELONGS_TO,User,UserID,ID").is_err());
    }
}
