use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use derivative::Derivative;
use log::{debug, info};

use super::error::{Error, Result};
use super::multiset::MultiSet;

type Queue = Rc<RefCell<VecDeque<MultiSet>>>;

/// Fan-out end of a stream: every batch sent reaches every attached reader.
///
/// Empty batches are dropped at the source so they never count as pending
/// work downstream.
#[derive(Clone)]
pub struct StreamWriter {
    queues: Rc<RefCell<Vec<Queue>>>,
}

impl StreamWriter {
    fn new() -> Self {
        Self {
            queues: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn send(&self, batch: MultiSet) {
        if batch.is_empty() {
            return;
        }
        for queue in self.queues.borrow().iter() {
            queue.borrow_mut().push_back(batch.clone());
        }
    }

    fn add_reader(&self) -> StreamReader {
        let queue = Queue::default();
        self.queues.borrow_mut().push(queue.clone());
        StreamReader { queue }
    }
}

/// One reader's private queue over an upstream operator's output.
pub struct StreamReader {
    queue: Queue,
}

impl StreamReader {
    pub fn drain(&self) -> Vec<MultiSet> {
        self.queue.borrow_mut().drain(..).collect()
    }

    pub fn has_batches(&self) -> bool {
        !self.queue.borrow().is_empty()
    }
}

/// A node of the running dataflow.
///
/// `run` drains the operator's input queues, computes, and emits; it is
/// called once per scheduler step, in registration order.
pub trait Operator {
    fn name(&self) -> &str;

    fn run(&mut self);

    /// Undrained input batches or operator-internal queued requests.
    fn has_pending_work(&self) -> bool;
}

#[derive(Default)]
struct GraphInner {
    operators: Vec<Box<dyn Operator>>,
    finalized: bool,
    steps: u64,
}

/// Shared owner of the operator registry and stream plumbing.
///
/// Cloning is shallow; all clones drive the same graph.
#[derive(Clone, Default)]
pub struct DataflowGraph {
    inner: Rc<RefCell<GraphInner>>,
}

impl DataflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// A root edge fed from outside the graph.
    pub fn new_input(&self) -> Result<(InputSession, Stream)> {
        self.ensure_composable()?;
        let writer = StreamWriter::new();
        let session = InputSession {
            writer: writer.clone(),
        };
        let stream = Stream {
            graph: self.clone(),
            writer,
        };
        Ok((session, stream))
    }

    pub fn finalize(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.finalized {
            return Err(Error::GraphFinalized);
        }
        inner.finalized = true;
        info!(
            "dataflow graph finalized with {} operators",
            inner.operators.len()
        );
        Ok(())
    }

    /// Runs every operator once, in registration order.
    pub fn step(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if !inner.finalized {
            return Err(Error::GraphNotFinalized);
        }
        inner.steps += 1;
        debug!("running step {}", inner.steps);
        for operator in &mut inner.operators {
            operator.run();
        }
        Ok(())
    }

    pub fn pending_work(&self) -> bool {
        self.inner
            .borrow()
            .operators
            .iter()
            .any(|operator| operator.has_pending_work())
    }

    /// Steps until no operator has pending work.
    pub fn run(&self) -> Result<()> {
        if !self.inner.borrow().finalized {
            return Err(Error::GraphNotFinalized);
        }
        while self.pending_work() {
            self.step()?;
        }
        Ok(())
    }

    fn ensure_composable(&self) -> Result<()> {
        if self.inner.borrow().finalized {
            return Err(Error::GraphFinalized);
        }
        Ok(())
    }

    fn register(&self, operator: Box<dyn Operator>) {
        let mut inner = self.inner.borrow_mut();
        assert!(!inner.finalized, "operator registered after finalize");
        debug!(
            "registered operator {} ({})",
            inner.operators.len(),
            operator.name()
        );
        inner.operators.push(operator);
    }
}

/// Root writer for external data; batches may be sent before and after
/// finalize, they sit queued until the next step.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct InputSession {
    #[derivative(Debug = "ignore")]
    writer: StreamWriter,
}

impl InputSession {
    pub fn send(&self, batch: MultiSet) {
        self.writer.send(batch);
    }
}

/// Cloneable handle to an operator's output edge; all operator
/// constructors hang off it.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Stream {
    #[derivative(Debug = "ignore")]
    graph: DataflowGraph,
    #[derivative(Debug = "ignore")]
    writer: StreamWriter,
}

impl Stream {
    pub(crate) fn ensure_same_graph(&self, other: &Self) -> Result<()> {
        if Rc::ptr_eq(&self.graph.inner, &other.graph.inner) {
            Ok(())
        } else {
            Err(Error::GraphMismatch)
        }
    }

    /// Attaches a unary operator downstream of `self`.
    pub(crate) fn add_unary<O>(
        &self,
        make: impl FnOnce(StreamReader, StreamWriter) -> O,
    ) -> Result<Self>
    where
        O: Operator + 'static,
    {
        self.graph.ensure_composable()?;
        let reader = self.writer.add_reader();
        let writer = StreamWriter::new();
        let output = Self {
            graph: self.graph.clone(),
            writer: writer.clone(),
        };
        self.graph.register(Box::new(make(reader, writer)));
        Ok(output)
    }

    /// Attaches a binary operator reading `self` and `other`.
    pub(crate) fn add_binary<O>(
        &self,
        other: &Self,
        make: impl FnOnce(StreamReader, StreamReader, StreamWriter) -> O,
    ) -> Result<Self>
    where
        O: Operator + 'static,
    {
        self.ensure_same_graph(other)?;
        self.graph.ensure_composable()?;
        let left = self.writer.add_reader();
        let right = other.writer.add_reader();
        let writer = StreamWriter::new();
        let output = Self {
            graph: self.graph.clone(),
            writer: writer.clone(),
        };
        self.graph.register(Box::new(make(left, right, writer)));
        Ok(output)
    }
}
