use std::sync::Arc;

use blockstream::block::{BlockKind, BlockType, Inline, InlineKind};
use blockstream::error::{ExtensionError, ExtensionResult, RegistryError};
use blockstream::plugin::{
    BlockExtension, ConflictStrategy, InlineExtension, OverrideStrategy, PermissiveSecurityPolicy,
    RenderProps,
};
use blockstream::token::{Token, TokenKind};
use blockstream::{Block, BlockParser, Plugin, PluginRuntime};
use pretty_assertions::assert_eq;

fn label(text: &'static str) -> impl Fn(&RenderProps<'_>) -> String + Send + Sync + 'static {
    move |_: &RenderProps<'_>| text.to_string()
}

/// Fenced `chart` blocks carrying a JSON payload
struct ChartExtension;

impl BlockExtension for ChartExtension {
    fn name(&self) -> &str {
        "chart"
    }

    fn token_type(&self) -> Option<&str> {
        Some("code_block")
    }

    fn matches(&self, token: &Token) -> bool {
        matches!(&token.kind, TokenKind::CodeBlock { info: Some(info) } if info.trim() == "chart")
    }

    fn parse(&self, token: &Token) -> ExtensionResult<Option<Block>> {
        let raw = token.plain_text();
        let data: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| ExtensionError::handler(e.to_string()))?;
        let mut block = Block::custom("chart", raw.trim_end());
        block.kind = BlockKind::Custom {
            custom_type: "chart".into(),
            data,
        };
        Ok(Some(block))
    }

    fn fallback(&self, token: &Token, _error: &ExtensionError) -> ExtensionResult<Option<Block>> {
        Ok(Some(Block::custom("chart-error", token.plain_text().trim_end())))
    }
}

/// Inline code written as `kbd:Keys` becomes a bold key label
struct KeyboardExtension;

impl InlineExtension for KeyboardExtension {
    fn name(&self) -> &str {
        "kbd"
    }

    fn token_type(&self) -> Option<&str> {
        Some("code")
    }

    fn parse(&self, token: &Token) -> ExtensionResult<Option<Inline>> {
        Ok(token
            .text
            .strip_prefix("kbd:")
            .map(|keys| Inline::nested(InlineKind::Bold, vec![Inline::text(keys)])))
    }
}

#[test]
fn later_plugin_replaces_binding_and_records_conflict() {
    let runtime = PluginRuntime::new(vec![
        Plugin::new("b").order(1).component("chart", label("B")),
        Plugin::new("a").order(0).component("chart", label("A")),
    ])
    .unwrap();

    assert_eq!(runtime.plugin_names().collect::<Vec<_>>(), vec!["a", "b"]);
    let binding = runtime.binding(&BlockType::from("chart")).unwrap();
    assert_eq!(binding.plugin, "b");

    let conflicts = runtime.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].existing_plugin_name.as_deref(), Some("a"));
    assert_eq!(conflicts[0].plugin_name, "b");
    assert_eq!(conflicts[0].block_type, "chart");
    assert_eq!(conflicts[0].strategy, ConflictStrategy::Replace);

    let rendered = runtime.render(&Block::custom("chart", "{}"), true);
    assert_eq!(rendered.as_deref(), Some("B"));
}

#[test]
fn error_strategy_aborts_registration() {
    let result = PluginRuntime::new(vec![
        Plugin::new("first").component(BlockType::Code, label("1")),
        Plugin::new("second")
            .order(1)
            .override_strategy(OverrideStrategy::Error)
            .component(BlockType::Code, label("2")),
    ]);
    assert!(matches!(result, Err(RegistryError::Conflict { .. })));
}

#[test]
fn untrusted_plugin_cannot_bind_html() {
    let runtime = PluginRuntime::new(vec![
        Plugin::new("raw-html").component(BlockType::Html, label("unsafe")),
        Plugin::new("para").component(BlockType::Paragraph, label("p")),
    ])
    .unwrap();

    assert!(runtime.binding(&BlockType::Html).is_none());
    assert!(runtime.binding(&BlockType::Paragraph).is_some());
    assert_eq!(runtime.conflicts().len(), 1);
    assert_eq!(runtime.conflicts()[0].strategy, ConflictStrategy::SecurityRejected);
    assert_eq!(runtime.conflicts()[0].existing_plugin_name, None);

    let html = Block::new(BlockKind::Html, "<script></script>");
    assert_eq!(runtime.render(&html, true), None);

    let trusted = PluginRuntime::with_policy(
        vec![Plugin::new("raw-html").component(BlockType::Html, label("ok"))],
        &PermissiveSecurityPolicy,
    )
    .unwrap();
    assert_eq!(trusted.render(&html, true).as_deref(), Some("ok"));
}

#[test]
fn chart_extension_replaces_matching_code_blocks() {
    let runtime = Arc::new(
        PluginRuntime::new(vec![Plugin::new("charts").block_extension(ChartExtension)]).unwrap(),
    );
    let mut parser = BlockParser::new().with_runtime(Arc::clone(&runtime));
    let out = parser.parse(
        "```chart\n{\"kind\": \"bar\", \"values\": [1, 2]}\n```\n\n```chart\nnot json\n```\n\n```js\nlet a = 1\n```\n",
    );

    let ids: Vec<&str> = out.blocks.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(ids, vec!["chart-0", "chart-error-1", "code-2"]);

    match &out.blocks[0].kind {
        BlockKind::Custom { custom_type, data } => {
            assert_eq!(custom_type, "chart");
            assert_eq!(data["kind"], "bar");
            assert_eq!(data["values"][1], 2);
        }
        other => panic!("expected chart, got {other:?}"),
    }
    assert_eq!(out.blocks[1].content, "not json");
    match &out.blocks[2].kind {
        BlockKind::Code { language, .. } => assert_eq!(language.as_deref(), Some("javascript")),
        other => panic!("expected code, got {other:?}"),
    }

    let stats = runtime.stats();
    let charts = stats.plugin("charts").unwrap();
    assert_eq!(charts.extension_calls, 2);
    assert_eq!(charts.extension_fallbacks, 1);
    assert_eq!(charts.errors, 1);
}

#[test]
fn inline_extension_rewrites_matching_spans() {
    let runtime = Arc::new(
        PluginRuntime::new(vec![Plugin::new("keys").inline_extension(KeyboardExtension)]).unwrap(),
    );
    let out = BlockParser::new()
        .with_runtime(runtime)
        .parse("Press `kbd:Ctrl+C` then `plain`\n");

    let spans = out.blocks[0].inlines().unwrap();
    assert_eq!(
        spans,
        &[
            Inline::text("Press "),
            Inline::nested(InlineKind::Bold, vec![Inline::text("Ctrl+C")]),
            Inline::text(" then "),
            Inline::code("plain"),
        ]
    );
}

#[test]
fn lifecycle_runs_once_and_cleans_up_in_reverse() {
    use std::sync::Mutex;

    let log = Arc::new(Mutex::new(Vec::new()));
    let plugin = |name: &'static str| {
        let on_init = Arc::clone(&log);
        let on_destroy = Arc::clone(&log);
        Plugin::new(name)
            .on_init(move || {
                on_init.lock().unwrap().push(format!("init {name}"));
                Ok(None)
            })
            .on_destroy(move || {
                on_destroy.lock().unwrap().push(format!("destroy {name}"));
                Ok(())
            })
    };

    let runtime = PluginRuntime::new(vec![plugin("one"), plugin("two")]).unwrap();
    runtime.init();
    runtime.init();
    runtime.destroy();
    drop(runtime);

    assert_eq!(
        *log.lock().unwrap(),
        vec!["init one", "init two", "destroy two", "destroy one"]
    );
}
