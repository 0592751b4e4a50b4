//! The hierarchical bean repository: a path-addressed, lazily-materialized
//! navigation layer over records or other backing data.
//!
//! Beans live in an arena owned by their [`BeanResolver`]; the parent
//! relation is a handle back-reference, never an owning pointer. A resolver
//! materializes children from its [`BeanSource`] on first access and caches
//! them for its own lifetime. The tree is pure presentation: it holds no
//! persistence of its own and is independent of the record identity map.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use bimap::BiMap;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::datatype::AttributeValue;
use crate::error::{BedrockError, Result, lock};
use crate::record::{OtherHasher, RecordContext, RecordKey};

pub const SEPARATOR: char = '/';

pub const BEAN_TYPE_REPOSITORY: &str = "repository";
pub const BEAN_TYPE_RECORD: &str = "record";

lazy_static! {
    // bean names are restricted so that paths stay unambiguous
    static ref SEGMENT: Regex = Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]*$").unwrap();
}

/// Split and validate a path before any resolution is attempted. Empty
/// segments and unsupported separators are rejected here; a missing bean is
/// not an error and surfaces later as an absent result.
fn split_path(path: &str) -> Result<Vec<String>> {
    let malformed = |reason: &str| BedrockError::MalformedPath {
        path: path.to_owned(),
        reason: reason.to_owned(),
    };
    if path.contains('\\') {
        return Err(malformed("unsupported separator '\\'"));
    }
    let relative = path.strip_prefix(SEPARATOR).unwrap_or(path);
    if relative.is_empty() {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    for segment in relative.split(SEPARATOR) {
        if segment.is_empty() {
            return Err(malformed("empty segment"));
        }
        if !SEGMENT.is_match(segment) {
            return Err(malformed(&format!("illegal segment '{}'", segment)));
        }
        segments.push(segment.to_owned());
    }
    Ok(segments)
}

// ------------- Capabilities -------------
/// A capability a bean may be morphed into. Each bean declares its
/// supported set explicitly; morphing to anything else reports absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Record,
    Container,
    Properties,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Capability::Record => "record",
            Capability::Container => "container",
            Capability::Properties => "properties",
        };
        write!(f, "{}", name)
    }
}

/// What a bean is backed by. The tree itself never dereferences the
/// backing; sources do, when children are materialized.
#[derive(Debug, Clone)]
pub enum Backing {
    None,
    Record(RecordKey),
}

/// The description a [`BeanSource`] hands back for each child it
/// materializes.
#[derive(Debug, Clone)]
pub struct BeanSeed {
    pub name: String,
    pub bean_type: String,
    pub capabilities: Vec<Capability>,
    pub properties: HashMap<String, AttributeValue, OtherHasher>,
    pub backing: Backing,
}

// ------------- Arena -------------
pub type BeanHandle = usize;

#[derive(Debug)]
struct BeanNode {
    name: String,
    bean_type: String,
    capabilities: Vec<Capability>,
    properties: HashMap<String, AttributeValue, OtherHasher>,
    backing: Backing,
    parent: Option<BeanHandle>,
    children: Option<Vec<BeanHandle>>,
}

impl BeanNode {
    fn from_seed(seed: BeanSeed, parent: Option<BeanHandle>) -> BeanNode {
        BeanNode {
            name: seed.name,
            bean_type: seed.bean_type,
            capabilities: seed.capabilities,
            properties: seed.properties,
            backing: seed.backing,
            parent,
            children: None,
        }
    }
}

struct Arena {
    nodes: Vec<BeanNode>,
    // both directions are needed: path -> handle when resolving,
    // handle -> path when computing a bean's own path
    paths: BiMap<String, BeanHandle>,
}

// ------------- Source -------------
/// Materializes bean children on demand. Implementations navigate their own
/// backing data; the resolver owns caching.
pub trait BeanSource: Send {
    fn root(&self) -> Result<BeanSeed>;
    fn children(&self, backing: &Backing, path: &str) -> Result<Vec<BeanSeed>>;
}

// ------------- Resolver -------------
/// Lazily materializes and caches the bean tree for one logical operation.
/// The cache lives and dies with the resolver; distinct resolver instances
/// never share it.
pub struct BeanResolver {
    source: Box<dyn BeanSource>,
    arena: Mutex<Arena>,
}

impl BeanResolver {
    pub fn new(source: impl BeanSource + 'static) -> Result<Arc<BeanResolver>> {
        let root_seed = source.root()?;
        let mut arena = Arena {
            nodes: Vec::new(),
            paths: BiMap::new(),
        };
        arena.nodes.push(BeanNode::from_seed(root_seed, None));
        arena.paths.insert(String::new(), 0);
        Ok(Arc::new(BeanResolver {
            source: Box::new(source),
            arena: Mutex::new(arena),
        }))
    }
    /// The root bean; its path is the empty string.
    pub fn root(self: &Arc<Self>) -> Bean {
        Bean {
            resolver: Arc::clone(self),
            handle: 0,
        }
    }
    /// Resolve a path from the root. Malformed paths are rejected before
    /// any walk; a missing bean yields an absent result.
    pub fn resolve(self: &Arc<Self>, path: &str) -> Result<Option<Bean>> {
        self.root().resolve(path)
    }

    fn children_of(&self, handle: BeanHandle) -> Result<Vec<BeanHandle>> {
        let mut arena = lock(&self.arena)?;
        let node = arena
            .nodes
            .get(handle)
            .ok_or_else(|| BedrockError::Invariant(format!("unknown bean handle {}", handle)))?;
        if let Some(cached) = &node.children {
            return Ok(cached.clone());
        }
        let backing = node.backing.clone();
        let path = arena
            .paths
            .get_by_right(&handle)
            .cloned()
            .unwrap_or_default();
        let seeds = self.source.children(&backing, &path)?;
        debug!(path = %path, children = seeds.len(), "materialized bean children");
        let mut handles = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let child_handle = arena.nodes.len();
            let child_path = format!("{}{}{}", path, SEPARATOR, seed.name);
            arena.paths.insert(child_path, child_handle);
            arena.nodes.push(BeanNode::from_seed(seed, Some(handle)));
            handles.push(child_handle);
        }
        arena.nodes[handle].children = Some(handles.clone());
        Ok(handles)
    }

    fn with_node<R>(&self, handle: BeanHandle, f: impl FnOnce(&BeanNode) -> R) -> Result<R> {
        let arena = lock(&self.arena)?;
        let node = arena
            .nodes
            .get(handle)
            .ok_or_else(|| BedrockError::Invariant(format!("unknown bean handle {}", handle)))?;
        Ok(f(node))
    }

    fn path_of(&self, handle: BeanHandle) -> Result<String> {
        let arena = lock(&self.arena)?;
        arena
            .paths
            .get_by_right(&handle)
            .cloned()
            .ok_or_else(|| BedrockError::Invariant(format!("unpathed bean handle {}", handle)))
    }

    fn cached_handle(&self, path: &str) -> Result<Option<BeanHandle>> {
        let arena = lock(&self.arena)?;
        Ok(arena.paths.get_by_left(path).copied())
    }
}

// ------------- Bean -------------
/// A node in the repository tree: named, path-addressed, morphable. Cheap
/// to clone; clones refer to the same node in the same resolver.
#[derive(Clone)]
pub struct Bean {
    resolver: Arc<BeanResolver>,
    handle: BeanHandle,
}

impl Bean {
    pub fn name(&self) -> Result<String> {
        self.resolver.with_node(self.handle, |node| node.name.clone())
    }
    pub fn bean_type(&self) -> Result<String> {
        self.resolver
            .with_node(self.handle, |node| node.bean_type.clone())
    }
    /// The bean's path: its parent's path joined with its own name. The
    /// root has the empty path.
    pub fn path(&self) -> Result<String> {
        self.resolver.path_of(self.handle)
    }
    pub fn parent(&self) -> Result<Option<Bean>> {
        let parent = self.resolver.with_node(self.handle, |node| node.parent)?;
        Ok(parent.map(|handle| Bean {
            resolver: Arc::clone(&self.resolver),
            handle,
        }))
    }
    /// The named child, materializing children on first access.
    pub fn child(&self, name: &str) -> Result<Option<Bean>> {
        for handle in self.resolver.children_of(self.handle)? {
            if self.resolver.with_node(handle, |node| node.name == name)? {
                return Ok(Some(Bean {
                    resolver: Arc::clone(&self.resolver),
                    handle,
                }));
            }
        }
        Ok(None)
    }
    /// All children, as a finite sequence that can be re-obtained at will.
    pub fn children(&self) -> Result<Vec<Bean>> {
        let handles = self.resolver.children_of(self.handle)?;
        Ok(handles
            .into_iter()
            .map(|handle| Bean {
                resolver: Arc::clone(&self.resolver),
                handle,
            })
            .collect())
    }
    pub fn properties(&self) -> Result<HashMap<String, AttributeValue, OtherHasher>> {
        self.resolver
            .with_node(self.handle, |node| node.properties.clone())
    }
    pub fn property(&self, name: &str) -> Result<Option<AttributeValue>> {
        self.resolver
            .with_node(self.handle, |node| node.properties.get(name).cloned())
    }
    /// Alias of [`Bean::property`] for templated consumers.
    pub fn get(&self, name: &str) -> Result<Option<AttributeValue>> {
        self.property(name)
    }
    /// Walk a path relative to this bean, segment by segment. An
    /// unresolvable segment yields an absent result rather than aborting
    /// with an error; only malformed paths are rejected.
    pub fn resolve(&self, path: &str) -> Result<Option<Bean>> {
        let segments = split_path(path)?;
        if segments.is_empty() {
            return Ok(Some(self.clone()));
        }
        let absolute = format!(
            "{}{}{}",
            self.path()?,
            SEPARATOR,
            segments.join(&SEPARATOR.to_string())
        );
        if let Some(handle) = self.resolver.cached_handle(&absolute)? {
            return Ok(Some(Bean {
                resolver: Arc::clone(&self.resolver),
                handle,
            }));
        }
        let mut current = self.clone();
        for segment in &segments {
            match current.child(segment)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

impl PartialEq for Bean {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.resolver, &other.resolver) && self.handle == other.handle
    }
}
impl Eq for Bean {}
impl fmt::Debug for Bean {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Bean({})", self.handle)
    }
}

// ------------- Morphing -------------
/// A bean adapted to the record capability: exposes the key of the record
/// it backs onto.
#[derive(Debug, Clone)]
pub struct RecordBean {
    key: RecordKey,
}
impl RecordBean {
    pub fn key(&self) -> &RecordKey {
        &self.key
    }
    pub fn record_type(&self) -> &str {
        self.key.record_type()
    }
}

/// A bean adapted to the container capability: child navigation only.
#[derive(Debug, Clone)]
pub struct ContainerBean {
    bean: Bean,
}
impl ContainerBean {
    pub fn children(&self) -> Result<Vec<Bean>> {
        self.bean.children()
    }
    pub fn child(&self, name: &str) -> Result<Option<Bean>> {
        self.bean.child(name)
    }
}

/// A bean adapted to the properties capability: a detached property view.
#[derive(Debug, Clone)]
pub struct PropertyBean {
    properties: HashMap<String, AttributeValue, OtherHasher>,
}
impl PropertyBean {
    pub fn property(&self, name: &str) -> Option<&AttributeValue> {
        self.properties.get(name)
    }
    pub fn names(&self) -> Vec<&str> {
        self.properties.keys().map(String::as_str).collect()
    }
    pub fn len(&self) -> usize {
        self.properties.len()
    }
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum Morphed {
    Record(RecordBean),
    Container(ContainerBean),
    Properties(PropertyBean),
}

impl Morphed {
    pub fn into_record(self) -> Option<RecordBean> {
        match self {
            Morphed::Record(record) => Some(record),
            _ => None,
        }
    }
    pub fn into_container(self) -> Option<ContainerBean> {
        match self {
            Morphed::Container(container) => Some(container),
            _ => None,
        }
    }
    pub fn into_properties(self) -> Option<PropertyBean> {
        match self {
            Morphed::Properties(properties) => Some(properties),
            _ => None,
        }
    }
}

/// Checked capability adaptation. Morphing an unsupported target reports
/// absence; it never errors and never casts.
pub trait Morphable {
    fn supports(&self, target: Capability) -> Result<bool>;
    fn morph(&self, target: Capability) -> Result<Option<Morphed>>;
}

impl Morphable for Bean {
    fn supports(&self, target: Capability) -> Result<bool> {
        self.resolver
            .with_node(self.handle, |node| node.capabilities.contains(&target))
    }
    fn morph(&self, target: Capability) -> Result<Option<Morphed>> {
        if !self.supports(target)? {
            return Ok(None);
        }
        let morphed = match target {
            Capability::Record => {
                match self.resolver.with_node(self.handle, |node| node.backing.clone())? {
                    Backing::Record(key) => Morphed::Record(RecordBean { key }),
                    Backing::None => return Ok(None),
                }
            }
            Capability::Container => Morphed::Container(ContainerBean { bean: self.clone() }),
            Capability::Properties => Morphed::Properties(PropertyBean {
                properties: self.properties()?,
            }),
        };
        Ok(Some(morphed))
    }
}

// ------------- Static source -------------
/// A seed tree over plain in-memory data, for beans that do not back onto
/// records.
#[derive(Debug, Clone)]
pub struct StaticNode {
    name: String,
    bean_type: String,
    capabilities: Vec<Capability>,
    properties: HashMap<String, AttributeValue, OtherHasher>,
    children: Vec<StaticNode>,
}

impl StaticNode {
    pub fn new(name: &str, bean_type: &str) -> Self {
        Self {
            name: name.to_owned(),
            bean_type: bean_type.to_owned(),
            capabilities: vec![Capability::Container, Capability::Properties],
            properties: HashMap::default(),
            children: Vec::new(),
        }
    }
    pub fn with_property(mut self, name: &str, value: AttributeValue) -> Self {
        self.properties.insert(name.to_owned(), value);
        self
    }
    pub fn with_child(mut self, child: StaticNode) -> Self {
        self.children.push(child);
        self
    }
    fn seed(&self) -> BeanSeed {
        BeanSeed {
            name: self.name.clone(),
            bean_type: self.bean_type.clone(),
            capabilities: self.capabilities.clone(),
            properties: self.properties.clone(),
            backing: Backing::None,
        }
    }
}

pub struct StaticSource {
    root: StaticNode,
}

impl StaticSource {
    pub fn new(root: StaticNode) -> Self {
        Self { root }
    }
    fn find(&self, path: &str) -> Result<Option<&StaticNode>> {
        let segments = split_path(path)?;
        let mut current = &self.root;
        for segment in &segments {
            match current.children.iter().find(|child| child.name == *segment) {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

impl BeanSource for StaticSource {
    fn root(&self) -> Result<BeanSeed> {
        let mut seed = self.root.seed();
        seed.name = String::new();
        Ok(seed)
    }
    fn children(&self, _backing: &Backing, path: &str) -> Result<Vec<BeanSeed>> {
        match self.find(path)? {
            Some(node) => Ok(node.children.iter().map(StaticNode::seed).collect()),
            None => Ok(Vec::new()),
        }
    }
}

// ------------- Record source -------------
/// Backs beans onto records: scalar attributes become properties and
/// reference attributes become children, materialized through the source's
/// own record context.
pub struct RecordSource {
    context: RecordContext,
    roots: Vec<(String, RecordKey)>,
}

impl RecordSource {
    pub fn new(context: RecordContext, roots: Vec<(String, RecordKey)>) -> Self {
        Self { context, roots }
    }
    fn record_seed(&self, name: &str, key: &RecordKey) -> Result<BeanSeed> {
        let record = self.context.record(key.record_type(), key.id())?;
        let attributes = self.context.attributes(&record)?;
        let properties = attributes
            .into_iter()
            .filter(|(_, value)| !matches!(value, AttributeValue::Reference(_)))
            .collect();
        Ok(BeanSeed {
            name: name.to_owned(),
            bean_type: BEAN_TYPE_RECORD.to_owned(),
            capabilities: vec![
                Capability::Record,
                Capability::Container,
                Capability::Properties,
            ],
            properties,
            backing: Backing::Record(key.clone()),
        })
    }
}

impl BeanSource for RecordSource {
    fn root(&self) -> Result<BeanSeed> {
        Ok(BeanSeed {
            name: String::new(),
            bean_type: BEAN_TYPE_REPOSITORY.to_owned(),
            capabilities: vec![Capability::Container],
            properties: HashMap::default(),
            backing: Backing::None,
        })
    }
    fn children(&self, backing: &Backing, _path: &str) -> Result<Vec<BeanSeed>> {
        let mut seeds = match backing {
            Backing::None => {
                let mut seeds = Vec::with_capacity(self.roots.len());
                for (name, key) in &self.roots {
                    seeds.push(self.record_seed(name, key)?);
                }
                seeds
            }
            Backing::Record(key) => {
                let record = self.context.record(key.record_type(), key.id())?;
                let attributes = self.context.attributes(&record)?;
                let mut seeds = Vec::new();
                for (name, value) in attributes {
                    if let AttributeValue::Reference(child) = value {
                        seeds.push(self.record_seed(&name, &child)?);
                    }
                }
                seeds
            }
        };
        seeds.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(seeds)
    }
}
