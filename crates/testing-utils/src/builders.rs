//! Test data builders for creating test entities
//!
//! Every builder starts from sensible defaults (project 1, entity type 1)
//! so tests only spell out what they assert on.

use chrono::{DateTime, Utc};
use mediaflow_domain::{
    Association, AssociationKind, AttributeType, AttributeValue, AuditFields, Dtype, Entity,
    EntityBase, EntityKind, EntityType, Leaf, Localization, Media, MediaRef, Shape, State,
};

/// Builder for entity types with an attribute schema
pub struct EntityTypeBuilder {
    entity_type: EntityType,
}

impl EntityTypeBuilder {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            entity_type: EntityType::new(1, 1, "test_type", kind),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.entity_type.id = id;
        self
    }

    pub fn with_project(mut self, project: i64) -> Self {
        self.entity_type.project = project;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.entity_type.name = name.to_string();
        self
    }

    pub fn with_attribute(mut self, name: &str, dtype: Dtype) -> Self {
        self.entity_type
            .attribute_types
            .push(AttributeType::new(name, dtype));
        self
    }

    pub fn with_enum_attribute(mut self, name: &str, choices: &[&str]) -> Self {
        self.entity_type
            .attribute_types
            .push(AttributeType::new(name, Dtype::Enum).with_choices(choices));
        self
    }

    pub fn build(self) -> EntityType {
        self.entity_type
    }
}

/// Builder for media entities
pub struct MediaBuilder {
    media: Media,
}

impl MediaBuilder {
    pub fn new(id: i64) -> Self {
        Self {
            media: Media {
                base: EntityBase::new(id, 1, 1, EntityKind::Video),
                name: format!("media_{id}.mp4"),
                md5: format!("{id:032x}"),
                gid: None,
                uid: None,
                section: None,
                num_frames: Some(300),
                fps: Some(30.0),
                files: Vec::new(),
            },
        }
    }

    pub fn with_project(mut self, project: i64) -> Self {
        self.media.base.project = Some(project);
        self
    }

    pub fn with_meta(mut self, meta: i64) -> Self {
        self.media.base.meta = meta;
        self
    }

    pub fn image(mut self) -> Self {
        self.media.base.kind = EntityKind::Image;
        self.media.num_frames = None;
        self.media.fps = None;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.media.name = name.to_string();
        self
    }

    pub fn with_section(mut self, section: &str) -> Self {
        self.media.section = Some(section.to_string());
        self
    }

    pub fn with_attribute(mut self, name: &str, value: AttributeValue) -> Self {
        self.media.base.attributes.insert(name.to_string(), value);
        self
    }

    pub fn build(self) -> Media {
        self.media
    }

    pub fn build_entity(self) -> Entity {
        Entity::Media(self.media)
    }
}

/// Builder for localizations (box by default)
pub struct LocalizationBuilder {
    localization: Localization,
}

impl LocalizationBuilder {
    pub fn new(id: i64, media_id: i64) -> Self {
        Self {
            localization: Localization {
                base: EntityBase::new(id, 1, 1, EntityKind::Box),
                media: MediaRef::new(media_id, EntityKind::Video),
                audit: AuditFields::default(),
                user: 1,
                email: "annotator@example.com".to_string(),
                frame: 0,
                x: 0.1,
                y: 0.2,
                thumbnail_image: None,
                shape: Shape::Box {
                    width: 0.3,
                    height: 0.4,
                },
            },
        }
    }

    pub fn with_project(mut self, project: i64) -> Self {
        self.localization.base.project = Some(project);
        self
    }

    pub fn with_meta(mut self, meta: i64) -> Self {
        self.localization.base.meta = meta;
        self
    }

    pub fn with_frame(mut self, frame: i64) -> Self {
        self.localization.frame = frame;
        self
    }

    pub fn as_line(mut self, u: f64, v: f64) -> Self {
        self.localization.base.kind = EntityKind::Line;
        self.localization.shape = Shape::Line { u, v };
        self
    }

    pub fn as_dot(mut self) -> Self {
        self.localization.base.kind = EntityKind::Dot;
        self.localization.shape = Shape::Dot;
        self
    }

    pub fn modified_at(mut self, at: DateTime<Utc>) -> Self {
        self.localization.audit.modified_datetime = at;
        self
    }

    pub fn with_attribute(mut self, name: &str, value: AttributeValue) -> Self {
        self.localization
            .base
            .attributes
            .insert(name.to_string(), value);
        self
    }

    pub fn build(self) -> Localization {
        self.localization
    }

    pub fn build_entity(self) -> Entity {
        Entity::Localization(self.localization)
    }
}

/// Builder for states associated with media
pub struct StateBuilder {
    state: State,
}

impl StateBuilder {
    pub fn new(id: i64) -> Self {
        Self {
            state: State {
                base: EntityBase::new(id, 1, 1, EntityKind::State),
                association: Association {
                    kind: AssociationKind::Media,
                    media: Vec::new(),
                    localizations: Vec::new(),
                    frame: None,
                    extracted: None,
                },
                audit: AuditFields::default(),
            },
        }
    }

    pub fn with_project(mut self, project: i64) -> Self {
        self.state.base.project = Some(project);
        self
    }

    pub fn with_meta(mut self, meta: i64) -> Self {
        self.state.base.meta = meta;
        self
    }

    pub fn with_media(mut self, ids: &[i64]) -> Self {
        self.state
            .association
            .media
            .extend(ids.iter().map(|id| MediaRef::new(*id, EntityKind::Video)));
        self
    }

    pub fn on_frame(mut self, frame: i64) -> Self {
        self.state.association.kind = AssociationKind::Frame;
        self.state.association.frame = Some(frame);
        self
    }

    pub fn with_extracted(mut self, image_id: i64) -> Self {
        self.state.association.extracted = Some(MediaRef::new(image_id, EntityKind::Image));
        self
    }

    pub fn with_attribute(mut self, name: &str, value: AttributeValue) -> Self {
        self.state.base.attributes.insert(name.to_string(), value);
        self
    }

    pub fn build_entity(self) -> Entity {
        Entity::State(self.state)
    }
}

/// Builder for tree leaves with a materialized path
pub struct LeafBuilder {
    leaf: Leaf,
}

impl LeafBuilder {
    pub fn new(id: i64, path: &str) -> Self {
        let name = path.rsplit('.').next().unwrap_or(path).to_string();
        Self {
            leaf: Leaf {
                base: EntityBase::new(id, 1, 1, EntityKind::Leaf),
                name,
                parent: None,
                path: path.to_string(),
            },
        }
    }

    pub fn with_project(mut self, project: i64) -> Self {
        self.leaf.base.project = Some(project);
        self
    }

    pub fn with_meta(mut self, meta: i64) -> Self {
        self.leaf.base.meta = meta;
        self
    }

    pub fn with_parent(mut self, parent: i64) -> Self {
        self.leaf.parent = Some(parent);
        self
    }

    pub fn build_entity(self) -> Entity {
        Entity::Leaf(self.leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_builder_defaults() {
        let media = MediaBuilder::new(5).with_section("dives").build();
        assert_eq!(media.base.id, 5);
        assert_eq!(media.base.project, Some(1));
        assert_eq!(media.section.as_deref(), Some("dives"));
        assert_eq!(media.duration(), 10.0);
    }

    #[test]
    fn test_leaf_builder_name_from_path() {
        let leaf = LeafBuilder::new(3, "Taxonomy.Fish.Cod").build_entity();
        match leaf {
            Entity::Leaf(leaf) => {
                assert_eq!(leaf.name, "Cod");
                assert_eq!(leaf.depth(), 3);
            }
            other => panic!("unexpected entity {other:?}"),
        }
    }
}
