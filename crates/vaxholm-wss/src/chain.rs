#![forbid(unsafe_code)]

//! The processor chain.
//!
//! Processors declare ordering constraints ("must run after processor X")
//! rather than absolute positions; the chain topologically sorts them
//! once at construction and fails there if the constraints are
//! unsatisfiable. Event flow is strictly sequential: a processor's
//! `process_event` completes before the next event enters the chain.

use crate::context::SecurityContext;
use std::collections::VecDeque;
use tracing::debug;
use vaxholm_core::{Error, Result};
use vaxholm_xml::XmlEvent;

/// Stable identifier of a processor within one chain.
pub type ProcessorId = &'static str;

/// One stage of the chain. A processor may forward an event unchanged,
/// transform it, swallow it for later replay, or synthesize additional
/// events through the cursor.
pub trait Processor: Send {
    fn id(&self) -> ProcessorId;

    /// Processors that must have run on an event before this one sees it.
    fn run_after(&self) -> &[ProcessorId] {
        &[]
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainCursor<'_>) -> Result<()>;
}

/// An ordered chain of processors terminating in an event sink.
pub struct ProcessorChain {
    processors: Vec<Option<Box<dyn Processor>>>,
    context: SecurityContext,
    sink: Vec<XmlEvent>,
}

impl std::fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorChain")
            .field("processors", &self.processors.len())
            .finish_non_exhaustive()
    }
}

impl ProcessorChain {
    /// Build a chain, resolving the declared ordering constraints by
    /// topological sort. Missing or cyclic constraints fail here, before
    /// the first event flows.
    pub fn new(processors: Vec<Box<dyn Processor>>, context: SecurityContext) -> Result<Self> {
        let sorted = topological_sort(processors)?;
        debug!(
            order = ?sorted.iter().map(|p| p.id()).collect::<Vec<_>>(),
            "processor chain constructed"
        );
        Ok(Self {
            processors: sorted.into_iter().map(Some).collect(),
            context,
            sink: Vec::new(),
        })
    }

    /// Introduce one event at the head of the chain.
    pub fn process_event(&mut self, event: XmlEvent) -> Result<()> {
        self.dispatch(0, event)
    }

    fn dispatch(&mut self, index: usize, event: XmlEvent) -> Result<()> {
        if index >= self.processors.len() {
            self.sink.push(event);
            return Ok(());
        }
        let mut processor = self.processors[index]
            .take()
            .ok_or_else(|| Error::Other("processor re-entered".into()))?;
        let result = processor.process_event(
            event,
            &mut ChainCursor {
                chain: self,
                next: index + 1,
            },
        );
        self.processors[index] = Some(processor);
        result
    }

    pub fn context(&self) -> &SecurityContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SecurityContext {
        &mut self.context
    }

    /// Tear down the chain, yielding the emitted events and the context.
    pub fn finish(self) -> (Vec<XmlEvent>, SecurityContext) {
        (self.sink, self.context)
    }
}

/// The view a processor has of the remainder of the chain.
pub struct ChainCursor<'a> {
    chain: &'a mut ProcessorChain,
    next: usize,
}

impl ChainCursor<'_> {
    /// Hand an event to the next processor (or the sink).
    pub fn forward(&mut self, event: XmlEvent) -> Result<()> {
        self.chain.dispatch(self.next, event)
    }

    pub fn context(&self) -> &SecurityContext {
        self.chain.context()
    }

    pub fn context_mut(&mut self) -> &mut SecurityContext {
        self.chain.context_mut()
    }
}

/// Kahn's algorithm over the declared `run_after` edges, keeping the
/// given order among unconstrained processors.
fn topological_sort(processors: Vec<Box<dyn Processor>>) -> Result<Vec<Box<dyn Processor>>> {
    let ids: Vec<ProcessorId> = processors.iter().map(|p| p.id()).collect();

    for processor in &processors {
        for dep in processor.run_after() {
            if !ids.contains(dep) {
                return Err(Error::ChainOrdering(format!(
                    "processor {} must run after {}, which is not in the chain",
                    processor.id(),
                    dep
                )));
            }
        }
    }

    let n = processors.len();
    let mut indegree = vec![0usize; n];
    for (i, processor) in processors.iter().enumerate() {
        indegree[i] = processor.run_after().len();
    }

    let mut slots: Vec<Option<Box<dyn Processor>>> = processors.into_iter().map(Some).collect();
    let mut ready: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut sorted: Vec<Box<dyn Processor>> = Vec::with_capacity(n);

    while let Some(i) = ready.pop_front() {
        let processor = slots[i].take().expect("slot emptied twice");
        let done_id = processor.id();
        sorted.push(processor);
        for (j, slot) in slots.iter().enumerate() {
            if let Some(p) = slot {
                if p.run_after().contains(&done_id) {
                    indegree[j] -= 1;
                    if indegree[j] == 0 {
                        ready.push_back(j);
                    }
                }
            }
        }
    }

    if sorted.len() != n {
        let stuck: Vec<ProcessorId> = slots.iter().flatten().map(|p| p.id()).collect();
        return Err(Error::ChainOrdering(format!(
            "cyclic ordering constraints among: {}",
            stuck.join(", ")
        )));
    }
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tagging {
        id: ProcessorId,
        after: Vec<ProcessorId>,
    }

    impl Processor for Tagging {
        fn id(&self) -> ProcessorId {
            self.id
        }
        fn run_after(&self) -> &[ProcessorId] {
            &self.after
        }
        fn process_event(&mut self, event: XmlEvent, chain: &mut ChainCursor<'_>) -> Result<()> {
            // Append this processor's id to the text so the traversal
            // order is observable.
            match event {
                XmlEvent::Characters(text) => {
                    chain.forward(XmlEvent::Characters(format!("{text}{}", self.id)))
                }
                other => chain.forward(other),
            }
        }
    }

    fn processor(id: ProcessorId, after: &[ProcessorId]) -> Box<dyn Processor> {
        Box::new(Tagging {
            id,
            after: after.to_vec(),
        })
    }

    #[test]
    fn test_dependency_order_applied() {
        let processors = vec![
            processor("c", &["b"]),
            processor("b", &["a"]),
            processor("a", &[]),
        ];
        let mut chain = ProcessorChain::new(processors, SecurityContext::new()).unwrap();
        chain.process_event(XmlEvent::Characters(String::new())).unwrap();
        let (events, _) = chain.finish();
        assert_eq!(events, [XmlEvent::Characters("abc".into())]);
    }

    #[test]
    fn test_missing_dependency_fails_construction() {
        let processors = vec![processor("a", &["ghost"])];
        let err = ProcessorChain::new(processors, SecurityContext::new()).unwrap_err();
        assert!(matches!(err, Error::ChainOrdering(_)));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_cycle_fails_construction() {
        let processors = vec![processor("a", &["b"]), processor("b", &["a"])];
        let err = ProcessorChain::new(processors, SecurityContext::new()).unwrap_err();
        assert!(matches!(err, Error::ChainOrdering(_)));
    }

    #[test]
    fn test_stable_order_without_constraints() {
        let processors = vec![processor("x", &[]), processor("y", &[]), processor("z", &[])];
        let mut chain = ProcessorChain::new(processors, SecurityContext::new()).unwrap();
        chain.process_event(XmlEvent::Characters(String::new())).unwrap();
        let (events, _) = chain.finish();
        assert_eq!(events, [XmlEvent::Characters("xyz".into())]);
    }
}
