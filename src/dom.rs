//! Host document abstraction.
//!
//! The document owns its elements; the engine only holds [`ElementHandle`]s
//! and must check [`Document::is_connected`] before every mutation.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

/// Non-owning reference to a document element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementHandle(pub u64);

/// What discovery sees of a candidate element.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSnapshot {
    pub handle: ElementHandle,
    pub tag: String,
    pub text: String,
    pub attributes: BTreeMap<String, String>,
    /// Tags of enclosing elements up to the content root
    pub ancestor_tags: Vec<String>,
    /// Attribute names present on any enclosing element
    pub ancestor_attributes: Vec<String>,
}

pub trait Document: Send + Sync {
    /// Route of the page currently rendered.
    fn route(&self) -> String;

    /// Elements with one of `tags` under `root`, in document order.
    fn query(&self, root: &str, tags: &[String]) -> Vec<ElementSnapshot>;

    fn is_connected(&self, element: ElementHandle) -> bool;

    fn text(&self, element: ElementHandle) -> Option<String>;

    /// Returns false when the element is no longer attached.
    fn set_text(&self, element: ElementHandle, text: &str) -> bool;

    fn markup(&self, element: ElementHandle) -> Option<String>;

    fn set_markup(&self, element: ElementHandle, markup: &str) -> bool;

    fn attribute(&self, element: ElementHandle, name: &str) -> Option<String>;

    fn set_attribute(&self, element: ElementHandle, name: &str, value: &str) -> bool;

    fn remove_attribute(&self, element: ElementHandle, name: &str) -> bool;
}

/// Element description for building a [`MemoryDocument`].
#[derive(Debug, Clone, Default)]
pub struct ElementSpec {
    pub tag: String,
    pub text: String,
    pub markup: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub ancestor_tags: Vec<String>,
    pub ancestor_attributes: Vec<String>,
}

impl ElementSpec {
    pub fn new(tag: &str, text: &str) -> Self {
        Self {
            tag: tag.to_string(),
            text: text.to_string(),
            ..Self::default()
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn inside(mut self, ancestor_tag: &str) -> Self {
        self.ancestor_tags.push(ancestor_tag.to_string());
        self
    }

    pub fn with_markup(mut self, markup: &str) -> Self {
        self.markup = Some(markup.to_string());
        self
    }
}

#[derive(Debug, Clone)]
struct MemoryElement {
    handle: ElementHandle,
    root: String,
    tag: String,
    text: String,
    markup: String,
    attributes: BTreeMap<String, String>,
    ancestor_tags: Vec<String>,
    ancestor_attributes: Vec<String>,
    connected: bool,
}

struct MemoryState {
    route: String,
    next_handle: u64,
    elements: Vec<MemoryElement>,
}

/// In-process document used by tests and the CLI.
pub struct MemoryDocument {
    inner: Mutex<MemoryState>,
}

impl MemoryDocument {
    pub fn new(route: &str) -> Self {
        Self {
            inner: Mutex::new(MemoryState {
                route: route.to_string(),
                next_handle: 1,
                elements: Vec::new(),
            }),
        }
    }

    pub fn insert(&self, root: &str, spec: ElementSpec) -> ElementHandle {
        let mut state = self.lock();
        let handle = ElementHandle(state.next_handle);
        state.next_handle += 1;
        let markup = spec.markup.unwrap_or_else(|| spec.text.clone());
        state.elements.push(MemoryElement {
            handle,
            root: root.to_string(),
            tag: spec.tag,
            text: spec.text,
            markup,
            attributes: spec.attributes,
            ancestor_tags: spec.ancestor_tags,
            ancestor_attributes: spec.ancestor_attributes,
            connected: true,
        });
        handle
    }

    /// Remove an element from the tree. Its handle stays invalid forever.
    pub fn detach(&self, element: ElementHandle) {
        if let Some(el) = self.lock().elements.iter_mut().find(|el| el.handle == element) {
            el.connected = false;
        }
    }

    /// Simulate navigation: every element is removed and the route changes.
    pub fn navigate(&self, route: &str) {
        let mut state = self.lock();
        state.route = route.to_string();
        for el in state.elements.iter_mut() {
            el.connected = false;
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn with_connected<T>(
        &self,
        element: ElementHandle,
        f: impl FnOnce(&mut MemoryElement) -> T,
    ) -> Option<T> {
        let mut state = self.lock();
        state
            .elements
            .iter_mut()
            .find(|el| el.handle == element && el.connected)
            .map(f)
    }
}

impl Document for MemoryDocument {
    fn route(&self) -> String {
        self.lock().route.clone()
    }

    fn query(&self, root: &str, tags: &[String]) -> Vec<ElementSnapshot> {
        self.lock()
            .elements
            .iter()
            .filter(|el| el.connected && el.root == root && tags.iter().any(|t| t == &el.tag))
            .map(|el| ElementSnapshot {
                handle: el.handle,
                tag: el.tag.clone(),
                text: el.text.clone(),
                attributes: el.attributes.clone(),
                ancestor_tags: el.ancestor_tags.clone(),
                ancestor_attributes: el.ancestor_attributes.clone(),
            })
            .collect()
    }

    fn is_connected(&self, element: ElementHandle) -> bool {
        self.with_connected(element, |_| ()).is_some()
    }

    fn text(&self, element: ElementHandle) -> Option<String> {
        self.with_connected(element, |el| el.text.clone())
    }

    fn set_text(&self, element: ElementHandle, text: &str) -> bool {
        self.with_connected(element, |el| {
            el.text = text.to_string();
            el.markup = text.to_string();
        })
        .is_some()
    }

    fn markup(&self, element: ElementHandle) -> Option<String> {
        self.with_connected(element, |el| el.markup.clone())
    }

    fn set_markup(&self, element: ElementHandle, markup: &str) -> bool {
        self.with_connected(element, |el| {
            el.markup = markup.to_string();
            el.text = strip_tags(markup);
        })
        .is_some()
    }

    fn attribute(&self, element: ElementHandle, name: &str) -> Option<String> {
        self.with_connected(element, |el| el.attributes.get(name).cloned())
            .flatten()
    }

    fn set_attribute(&self, element: ElementHandle, name: &str, value: &str) -> bool {
        self.with_connected(element, |el| {
            el.attributes.insert(name.to_string(), value.to_string());
        })
        .is_some()
    }

    fn remove_attribute(&self, element: ElementHandle, name: &str) -> bool {
        self.with_connected(element, |el| {
            el.attributes.remove(name);
        })
        .is_some()
    }
}

fn strip_tags(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut in_tag = false;
    for ch in markup.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}
