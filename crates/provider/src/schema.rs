//! Per-kind provider schemas
//!
//! The diff engine needs two facts about every resource kind: which declared
//! attributes cannot change in place, and whether the kind tolerates a second
//! live instance while a replacement is created.

use driftwood_common::ResourceKind;

/// Provider-declared facts about a resource kind
#[derive(Debug, Clone, Copy)]
pub struct KindSchema {
    /// Attributes that force a Replace when changed
    pub immutable: &'static [&'static str],
    /// Whether replacement may create the new instance before deleting the
    /// old one. Name-addressed kinds cannot: two instances would collide.
    pub create_before_delete: bool,
}

impl KindSchema {
    pub fn is_immutable(&self, attr: &str) -> bool {
        self.immutable.contains(&attr)
    }
}

/// Schema for a resource kind
pub fn for_kind(kind: ResourceKind) -> KindSchema {
    match kind {
        ResourceKind::Bucket => KindSchema {
            immutable: &["bucket_name", "encryption"],
            create_before_delete: false,
        },
        ResourceKind::Queue => KindSchema {
            immutable: &["queue_name", "fifo_queue", "content_based_deduplication"],
            create_before_delete: false,
        },
        ResourceKind::Topic => KindSchema {
            immutable: &["topic_name", "fifo"],
            create_before_delete: false,
        },
        ResourceKind::Subscription => KindSchema {
            immutable: &["topic", "protocol", "endpoint"],
            create_before_delete: true,
        },
        ResourceKind::Policy => KindSchema {
            immutable: &["queue"],
            create_before_delete: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_kinds_replace_delete_first() {
        assert!(!for_kind(ResourceKind::Bucket).create_before_delete);
        assert!(!for_kind(ResourceKind::Queue).create_before_delete);
        assert!(!for_kind(ResourceKind::Topic).create_before_delete);
        assert!(for_kind(ResourceKind::Subscription).create_before_delete);
        assert!(for_kind(ResourceKind::Policy).create_before_delete);
    }

    #[test]
    fn queue_name_is_immutable_retention_is_not() {
        let schema = for_kind(ResourceKind::Queue);
        assert!(schema.is_immutable("queue_name"));
        assert!(!schema.is_immutable("retention_days"));
        assert!(!schema.is_immutable("visibility_timeout_secs"));
    }
}
