use crate::block::BlockType;

use super::Plugin;

/// Decides whether a plugin may bind a renderer for a block type.
pub trait SecurityPolicy: Send + Sync {
    fn may_bind(&self, plugin: &Plugin, block_type: &BlockType) -> bool;
}

/// Only builtin plugins may render raw `html` blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSecurityPolicy;

impl SecurityPolicy for DefaultSecurityPolicy {
    fn may_bind(&self, plugin: &Plugin, block_type: &BlockType) -> bool {
        plugin.builtin || *block_type != BlockType::Html
    }
}

/// Accepts every binding
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissiveSecurityPolicy;

impl SecurityPolicy for PermissiveSecurityPolicy {
    fn may_bind(&self, _plugin: &Plugin, _block_type: &BlockType) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_guards_html() {
        let policy = DefaultSecurityPolicy;
        let third_party = Plugin::new("x");
        let builtin = Plugin::new("core").builtin();
        assert!(!policy.may_bind(&third_party, &BlockType::Html));
        assert!(policy.may_bind(&third_party, &BlockType::Code));
        assert!(policy.may_bind(&builtin, &BlockType::Html));
    }
}
