use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

/// A rendered page element as seen by the dispatch layer: enough structure
/// for selector matching, ancestor scoping and reading attributes off
/// neighbouring nodes. The embedding host mirrors the live page into this
/// shape; nothing here touches a real document.
#[derive(Clone)]
pub struct PageElement(Arc<Node>);

struct Node {
    tag: String,
    classes: Vec<String>,
    attrs: HashMap<String, String>,
    text: String,
    parent: RwLock<Weak<Node>>,
    children: RwLock<Vec<PageElement>>,
}

impl PageElement {
    pub fn build(tag: &str) -> ElementBuilder {
        ElementBuilder {
            tag: tag.to_string(),
            classes: Vec::new(),
            attrs: HashMap::new(),
            text: String::new(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.0.tag
    }

    pub fn text(&self) -> &str {
        &self.0.text
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.0.classes.iter().any(|c| c == class)
    }

    pub fn attr(&self, name: &str) -> Option<String> {
        self.0.attrs.get(name).cloned()
    }

    /// Attaches `child` under `self` and returns it.
    pub fn append(&self, child: PageElement) -> PageElement {
        *child.0.parent.write() = Arc::downgrade(&self.0);
        self.0.children.write().push(child.clone());
        child
    }

    pub fn parent(&self) -> Option<PageElement> {
        self.0.parent.read().upgrade().map(PageElement)
    }

    pub fn children(&self) -> Vec<PageElement> {
        self.0.children.read().clone()
    }

    pub fn first_child(&self) -> Option<PageElement> {
        self.0.children.read().first().cloned()
    }

    pub fn next_sibling(&self) -> Option<PageElement> {
        let parent = self.parent()?;
        let siblings = parent.0.children.read();
        let index = siblings.iter().position(|el| Arc::ptr_eq(&el.0, &self.0))?;
        siblings.get(index + 1).cloned()
    }

    /// Matches a single compound like `div`, `.story`, or `a.story-block`.
    pub fn matches_compound(&self, compound: &str) -> bool {
        let compound = compound.trim();
        if compound.is_empty() {
            return false;
        }
        if compound == "*" {
            return true;
        }
        let mut parts = compound.split('.');
        let tag = parts.next().unwrap_or("");
        if !tag.is_empty() && !tag.eq_ignore_ascii_case(&self.0.tag) {
            return false;
        }
        parts.all(|class| !class.is_empty() && self.has_class(class))
    }

    /// Nearest ancestor (self included) matching the compound.
    pub fn closest(&self, compound: &str) -> Option<PageElement> {
        let mut current = Some(self.clone());
        while let Some(el) = current {
            if el.matches_compound(compound) {
                return Some(el);
            }
            current = el.parent();
        }
        None
    }

    /// Depth-first search for the first descendant matching any of the
    /// comma-separated compounds.
    pub fn query(&self, compounds: &str) -> Option<PageElement> {
        let alternatives: Vec<&str> = compounds.split(',').map(str::trim).collect();
        for child in self.children() {
            if alternatives.iter().any(|alt| child.matches_compound(alt)) {
                return Some(child);
            }
            if let Some(found) = child.query(compounds) {
                return Some(found);
            }
        }
        None
    }
}

impl std::fmt::Debug for PageElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageElement")
            .field("tag", &self.0.tag)
            .field("classes", &self.0.classes)
            .finish()
    }
}

pub struct ElementBuilder {
    tag: String,
    classes: Vec<String>,
    attrs: HashMap<String, String>,
    text: String,
}

impl ElementBuilder {
    pub fn class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn done(self) -> PageElement {
        PageElement(Arc::new(Node {
            tag: self.tag,
            classes: self.classes,
            attrs: self.attrs,
            text: self.text,
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(Vec::new()),
        }))
    }
}
