//! The immutable coroutine context.

use crate::dispatch::Dispatch;
use crate::runtime::Job;
use core::fmt;
use std::any::{Any, TypeId};
use std::sync::Arc;

/// An immutable mapping from element keys to elements.
///
/// A context travels with a coroutine: it is captured at every suspension
/// point and restored on resume. Recognized elements are the current
/// [`Job`], the current dispatcher, and opaque user elements keyed by
/// their type. Contexts compose by override-merge: the right operand wins
/// per key.
///
/// Internally a context is a persistent cons list; `with_*` and `merge`
/// share structure with the originals, and lookup returns the most
/// recently added element of a given key.
#[derive(Clone, Default)]
pub struct Context {
    head: Option<Arc<Node>>,
}

struct Node {
    entry: Entry,
    next: Option<Arc<Node>>,
}

#[derive(Clone)]
enum Entry {
    Job(Job),
    Dispatcher(Arc<dyn Dispatch>),
    User(TypeId, Arc<dyn Any + Send + Sync>),
}

impl Entry {
    fn key(&self) -> EntryKey {
        match self {
            Self::Job(_) => EntryKey::Job,
            Self::Dispatcher(_) => EntryKey::Dispatcher,
            Self::User(id, _) => EntryKey::User(*id),
        }
    }
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum EntryKey {
    Job,
    Dispatcher,
    User(TypeId),
}

impl Context {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a context with `job` installed as the current job.
    #[must_use]
    pub fn with_job(&self, job: Job) -> Self {
        self.prepend(Entry::Job(job))
    }

    /// Returns a context with `dispatcher` installed as the current
    /// dispatcher.
    #[must_use]
    pub fn with_dispatcher(&self, dispatcher: Arc<dyn Dispatch>) -> Self {
        self.prepend(Entry::Dispatcher(dispatcher))
    }

    /// Returns a context with a user element installed, keyed by its type.
    #[must_use]
    pub fn with_element<E: Any + Send + Sync>(&self, element: Arc<E>) -> Self {
        self.prepend(Entry::User(TypeId::of::<E>(), element))
    }

    /// Looks up the current job.
    #[must_use]
    pub fn job(&self) -> Option<Job> {
        self.entries().find_map(|entry| match entry {
            Entry::Job(job) => Some(job.clone()),
            _ => None,
        })
    }

    /// Looks up the current dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> Option<Arc<dyn Dispatch>> {
        self.entries().find_map(|entry| match entry {
            Entry::Dispatcher(dispatcher) => Some(Arc::clone(dispatcher)),
            _ => None,
        })
    }

    /// Looks up a user element by its type.
    #[must_use]
    pub fn element<E: Any + Send + Sync>(&self) -> Option<Arc<E>> {
        self.entries().find_map(|entry| match entry {
            Entry::User(id, element) if *id == TypeId::of::<E>() => {
                Arc::clone(element).downcast::<E>().ok()
            }
            _ => None,
        })
    }

    /// Merges two contexts; elements of `other` win per key.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        // Prepend other's entries in front of ours, preserving their
        // relative order, so lookup (front-first) is right-biased.
        let mut merged = self.clone();
        let entries: Vec<Entry> = other.entries().cloned().collect();
        for entry in entries.into_iter().rev() {
            merged = merged.prepend(entry);
        }
        merged
    }

    fn prepend(&self, entry: Entry) -> Self {
        Self {
            head: Some(Arc::new(Node {
                entry,
                next: self.head.clone(),
            })),
        }
    }

    fn entries(&self) -> EntryIter<'_> {
        EntryIter {
            node: self.head.as_deref(),
        }
    }
}

struct EntryIter<'a> {
    node: Option<&'a Node>,
}

impl<'a> Iterator for EntryIter<'a> {
    type Item = &'a Entry;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.node?;
        self.node = node.next.as_deref();
        Some(&node.entry)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        let mut seen: Vec<EntryKey> = Vec::new();
        for entry in self.entries() {
            if seen.contains(&entry.key()) {
                continue;
            }
            seen.push(entry.key());
            match entry {
                Entry::Job(job) => set.entry(&format_args!("job: {job:?}")),
                Entry::Dispatcher(d) => set.entry(&format_args!("dispatcher: {d:?}")),
                Entry::User(..) => set.entry(&format_args!("user element")),
            };
        }
        set.finish()
    }
}
