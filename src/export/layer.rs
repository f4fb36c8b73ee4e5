//! Layer overrides.
//!
//! A layered export writes an archive meant to be combined with a base
//! scene. Path-pattern rules decide per node whether its subtree is emitted
//! in full, as a sparse override, replaced wholesale, pruned, or left out.
//! Finer rules decide whether visibility, geometry attributes and user
//! properties are written on a node.
//!
//! Resolution happens once per save, top-down with a bottom-up promotion:
//! - an explicit or inherited `Prune`/`Replace` is forced onto every descendant
//! - an explicit `Full` becomes the default for descendants without a rule
//! - with no node rules at all everything is `Full`, otherwise the default is `None`
//! - a `None`/`Sparse` node with exported descendants is promoted to `Sparse`,
//!   or to `Full` when a descendant is full and full ancestors are requested

use regex::Regex;

use super::{NodeId, NodeTree};
use crate::core::MetaData;
use crate::util::{Error, Result};

/// Disposition of a node in a layered export.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    /// Not exported.
    #[default]
    None,
    /// Exported as an empty placeholder marking removal.
    Prune,
    /// Exported sparsely; only overridden properties are written.
    Sparse,
    /// Exported with all properties.
    Full,
    /// Exported with all properties, replacing the base subtree.
    Replace,
}

impl LayerType {
    /// Whether the container object is created sparse.
    pub fn is_sparse(self) -> bool {
        matches!(self, Self::Prune | Self::Sparse)
    }

    /// Whether values (transforms, geometry) are written.
    pub fn writes_values(self) -> bool {
        matches!(self, Self::Full | Self::Replace)
    }

    /// Metadata marking the layer disposition on the container object.
    pub fn metadata(self) -> MetaData {
        match self {
            Self::Prune => MetaData::new().with(MetaData::PRUNE_KEY, "1"),
            Self::Replace => MetaData::new().with(MetaData::REPLACE_KEY, "1"),
            _ => MetaData::new(),
        }
    }
}

/// How visibility is written on a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VizType {
    /// No visibility property.
    #[default]
    None,
    /// The computed per-frame visibility.
    Default,
    /// Always deferred to the parent.
    Deferred,
    /// Always hidden.
    Hidden,
    /// Always visible.
    Visible,
}

/// Whitespace separated glob list with `^` exclusions, e.g. `/geo/* ^/geo/tmp*`.
///
/// Terms are applied left to right; the last matching term decides.
#[derive(Clone, Debug)]
pub struct Pattern {
    source: String,
    terms: Vec<(bool, Regex)>,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self> {
        let mut terms = Vec::new();
        for token in source.split(|c: char| c.is_whitespace() || c == ',').filter(|t| !t.is_empty()) {
            let (exclude, glob) = match token.strip_prefix('^') {
                Some(rest) => (true, rest),
                None => (false, token),
            };
            let regex = Regex::new(&glob_to_regex(glob))
                .map_err(|e| Error::config(format!("bad pattern {token:?}: {e}")))?;
            terms.push((exclude, regex));
        }
        if terms.is_empty() {
            return Err(Error::config(format!("empty pattern {source:?}")));
        }
        Ok(Self {
            source: source.to_string(),
            terms,
        })
    }

    pub fn matches(&self, s: &str) -> bool {
        let mut matched = false;
        for (exclude, regex) in &self.terms {
            if regex.is_match(s) {
                matched = !exclude;
            }
        }
        matched
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            _ => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');
    out
}

#[derive(Clone, Debug)]
struct Rule<T> {
    node: Pattern,
    name: Option<Pattern>,
    value: T,
}

/// Ordered rule lists. The first matching rule wins.
#[derive(Clone, Debug, Default)]
pub struct LayerOptions {
    nodes: Vec<Rule<LayerType>>,
    viz: Vec<Rule<VizType>>,
    attrs: Vec<Rule<LayerType>>,
    user_props: Vec<Rule<LayerType>>,
}

impl LayerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no rule of any kind is set.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.viz.is_empty() && self.attrs.is_empty() && self.user_props.is_empty()
    }

    /// Append a node rule.
    pub fn add_node_rule(&mut self, pattern: &str, layer: LayerType) -> Result<&mut Self> {
        self.nodes.push(Rule {
            node: Pattern::new(pattern)?,
            name: None,
            value: layer,
        });
        Ok(self)
    }

    /// Append a visibility rule.
    pub fn add_viz_rule(&mut self, pattern: &str, viz: VizType) -> Result<&mut Self> {
        self.viz.push(Rule {
            node: Pattern::new(pattern)?,
            name: None,
            value: viz,
        });
        Ok(self)
    }

    /// Append an attribute rule scoped to nodes matching `pattern`.
    pub fn add_attr_rule(&mut self, pattern: &str, attrs: &str, layer: LayerType) -> Result<&mut Self> {
        self.attrs.push(Rule {
            node: Pattern::new(pattern)?,
            name: Some(Pattern::new(attrs)?),
            value: layer,
        });
        Ok(self)
    }

    /// Append a user property rule scoped to nodes matching `pattern`.
    pub fn add_user_prop_rule(&mut self, pattern: &str, props: &str, layer: LayerType) -> Result<&mut Self> {
        self.user_props.push(Rule {
            node: Pattern::new(pattern)?,
            name: Some(Pattern::new(props)?),
            value: layer,
        });
        Ok(self)
    }

    /// Explicit node rule for `path`, if any.
    pub fn match_node(&self, path: &str) -> Option<LayerType> {
        first_match(&self.nodes, path, None)
    }

    /// Visibility mode for a node of the given disposition.
    pub fn viz_type(&self, path: &str, node: LayerType) -> VizType {
        match first_match(&self.viz, path, None) {
            Some(v) => v,
            None if node.writes_values() => VizType::Default,
            None => VizType::None,
        }
    }

    /// Disposition of attribute `name` on a node.
    pub fn attr_type(&self, path: &str, name: &str, node: LayerType) -> LayerType {
        scoped_type(&self.attrs, path, name, node)
    }

    /// Disposition of user property `name` on a node.
    pub fn user_prop_type(&self, path: &str, name: &str, node: LayerType) -> LayerType {
        scoped_type(&self.user_props, path, name, node)
    }

    /// Resolve the disposition of every node in `tree`.
    pub fn resolve(&self, tree: &NodeTree, full_ancestors: bool) -> LayerAssignment {
        let mut types = vec![LayerType::None; tree.len()];
        let default = if self.nodes.is_empty() {
            LayerType::Full
        } else {
            LayerType::None
        };

        let root = tree.root();
        for &child in tree.node(root).children() {
            self.resolve_node(tree, child, None, default, full_ancestors, &mut types);
        }
        types[root.index()] = LayerType::Full;
        LayerAssignment { types }
    }

    fn resolve_node(
        &self,
        tree: &NodeTree,
        id: NodeId,
        forced: Option<LayerType>,
        default: LayerType,
        full_ancestors: bool,
        types: &mut [LayerType],
    ) -> LayerType {
        let node = tree.node(id);
        let (own, child_forced, child_default) = match forced {
            Some(f) => (f, Some(f), default),
            None => match self.match_node(node.path()) {
                Some(t @ (LayerType::Prune | LayerType::Replace)) => (t, Some(t), default),
                Some(LayerType::Full) => (LayerType::Full, None, LayerType::Full),
                Some(t) => (t, None, default),
                None => (default, None, default),
            },
        };

        let mut any_full = false;
        let mut any = false;
        for &child in node.children() {
            let t = self.resolve_node(tree, child, child_forced, child_default, full_ancestors, types);
            any_full |= t.writes_values();
            any |= t != LayerType::None;
        }

        let resolved = match own {
            LayerType::None | LayerType::Sparse if any_full && full_ancestors => LayerType::Full,
            LayerType::None | LayerType::Sparse if any => LayerType::Sparse,
            t => t,
        };
        types[id.index()] = resolved;
        resolved
    }
}

fn first_match<T: Copy>(rules: &[Rule<T>], path: &str, name: Option<&str>) -> Option<T> {
    rules
        .iter()
        .find(|r| {
            r.node.matches(path)
                && match (&r.name, name) {
                    (Some(p), Some(n)) => p.matches(n),
                    (None, _) => true,
                    (Some(_), None) => false,
                }
        })
        .map(|r| r.value)
}

fn scoped_type(rules: &[Rule<LayerType>], path: &str, name: &str, node: LayerType) -> LayerType {
    match first_match(rules, path, Some(name)) {
        Some(t) => t,
        None if node.writes_values() => node,
        None => LayerType::None,
    }
}

/// Per-node dispositions produced by [`LayerOptions::resolve`].
#[derive(Clone, Debug, Default)]
pub struct LayerAssignment {
    types: Vec<LayerType>,
}

impl LayerAssignment {
    /// Disposition of `id`; nodes created after resolution are not exported.
    pub fn get(&self, id: NodeId) -> LayerType {
        self.types.get(id.index()).copied().unwrap_or_default()
    }
}
