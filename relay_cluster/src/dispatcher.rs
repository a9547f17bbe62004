// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The invocation dispatcher resolves a call's destinations against one registry
//! snapshot, executes it locally or through the remote invokers, and delivers exactly
//! one terminal outcome through the channel the call's dispatch type selects.
//!
//! * [DispatchType::Synchronous]: the caller awaits the outcome
//!   ([InvocationDispatcher::invoke], or [InvocationDispatcher::invoke_blocking] from
//!   threads outside the runtime)
//! * [DispatchType::Future]: the caller holds an [InvocationFuture]
//! * [DispatchType::Consumer]: the outcome goes to the call's [Callbacks], the caller
//!   holds a [Completion]

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use once_cell::sync::OnceCell;
use relay::concurrency::{oneshot, Duration, JoinHandle, JoinSet, OneshotReceiver};
use relay::invocation::Callbacks;
use relay::routing::{resolve, Destination};
use relay::{
    DispatchType, InstanceMetadataSource, Invocation, NodeId, RelayErr, Reply, ResourceId,
    RoutingStrategy, Target,
};

use crate::metadata::{InFlight, LocalMetadataContext};
use crate::node::NodeTable;
use crate::registry::{RegistrySnapshot, RemoteInvokerRegistry};

/// One call: an invocation, where it goes, and who receives its outcome
#[derive(Debug)]
pub struct Call {
    /// The invocation
    pub invocation: Invocation,
    /// The addressed resource or application
    pub target: Target,
    /// Receivers of the outcome
    pub callbacks: Callbacks,
    /// Overrides the instance's call timeout
    pub timeout: Option<Duration>,
}

impl Call {
    /// A call without callbacks, bounded by the instance's call timeout
    pub fn new(invocation: Invocation, target: Target) -> Self {
        Self {
            invocation,
            target,
            callbacks: Callbacks::none(),
            timeout: None,
        }
    }

    /// Set the outcome receivers
    pub fn with_callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Bound this call by `timeout` instead of the instance's call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The outcome of a FUTURE call, resolved once
#[derive(Debug)]
pub struct InvocationFuture {
    outcome: OneshotReceiver<Result<Reply, RelayErr>>,
    task: JoinHandle<()>,
}

impl InvocationFuture {
    /// Stop waiting. The remote side may still complete the call, and its late
    /// outcome is discarded.
    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Future for InvocationFuture {
    type Output = Result<Reply, RelayErr>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.outcome).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => {
                Poll::Ready(Err(RelayErr::shutdown("The call was abandoned")))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Signals that a CONSUMER call's outcome has been handed to its callbacks
#[derive(Debug)]
pub struct Completion {
    task: JoinHandle<Result<(), RelayErr>>,
}

impl Completion {
    /// Wait for the outcome's delivery
    ///
    /// Failures always reach the error callback. A call dispatched without one is
    /// rejected before it executes, and the rejection is returned here instead.
    pub async fn wait(self) -> Result<(), RelayErr> {
        self.task
            .await
            .map_err(|_| RelayErr::shutdown("The call was abandoned"))?
    }

    /// Stop waiting for the outcome. No callback runs.
    pub fn cancel(self) {
        self.task.abort();
    }
}

/// How a dispatched call hands back its outcome
#[derive(Debug)]
pub enum Dispatch {
    /// The outcome of a SYNCHRONOUS call
    Sync(Result<Reply, RelayErr>),
    /// The pending outcome of a FUTURE call
    Future(InvocationFuture),
    /// The delivery signal of a CONSUMER call
    Consumer(Completion),
}

struct DispatcherInner {
    local: Arc<LocalMetadataContext>,
    nodes: Arc<NodeTable>,
    registry: Arc<RemoteInvokerRegistry>,
    in_flight: InFlight,
    call_timeout: Duration,
    open: Arc<AtomicBool>,
    runtime: OnceCell<tokio::runtime::Handle>,
}

/// Routes and executes calls on behalf of the local instance
#[derive(Clone)]
pub struct InvocationDispatcher {
    inner: Arc<DispatcherInner>,
}

impl std::fmt::Debug for InvocationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationDispatcher")
            .field("instance", &self.inner.local.instance_id())
            .field("call_timeout", &self.inner.call_timeout)
            .field("open", &self.inner.open.load(Ordering::SeqCst))
            .finish()
    }
}

impl InvocationDispatcher {
    /// Create a dispatcher. Calls are rejected until `open` is set.
    pub fn new(
        local: Arc<LocalMetadataContext>,
        nodes: Arc<NodeTable>,
        registry: Arc<RemoteInvokerRegistry>,
        in_flight: InFlight,
        call_timeout: Duration,
        open: Arc<AtomicBool>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                local,
                nodes,
                registry,
                in_flight,
                call_timeout,
                open,
                runtime: OnceCell::new(),
            }),
        }
    }

    /// Bind the runtime [InvocationDispatcher::invoke_blocking] executes on
    pub(crate) fn bind_runtime(&self, runtime: tokio::runtime::Handle) {
        let _ = self.inner.runtime.set(runtime);
    }

    /// Dispatch a call according to its invocation's dispatch type
    pub async fn dispatch(&self, call: Call) -> Dispatch {
        match call.invocation.dispatch {
            DispatchType::Synchronous => Dispatch::Sync(self.invoke(call).await),
            DispatchType::Future => Dispatch::Future(self.submit(call)),
            DispatchType::Consumer => Dispatch::Consumer(self.consume(call)),
        }
    }

    /// Execute a call and wait for its outcome
    pub async fn invoke(&self, call: Call) -> Result<Reply, RelayErr> {
        let timeout = call.timeout.unwrap_or(self.inner.call_timeout);
        self.inner
            .clone()
            .execute(call.invocation, call.target, timeout)
            .await
    }

    /// Execute a call in the background. The outcome resolves the returned future and
    /// is also handed to the call's callbacks, if any.
    pub fn submit(&self, call: Call) -> InvocationFuture {
        let (tx, rx) = oneshot();
        let inner = self.inner.clone();
        let timeout = call.timeout.unwrap_or(inner.call_timeout);
        let task = relay::concurrency::spawn(async move {
            let outcome = inner.execute(call.invocation, call.target, timeout).await;
            if call.callbacks.has_result() || call.callbacks.has_error() {
                call.callbacks.deliver(outcome.clone());
            }
            let _ = tx.send(outcome);
        });
        InvocationFuture { outcome: rx, task }
    }

    /// Execute a call in the background, handing its outcome to the call's callbacks.
    /// The call must carry an error callback.
    pub fn consume(&self, call: Call) -> Completion {
        let inner = self.inner.clone();
        let timeout = call.timeout.unwrap_or(inner.call_timeout);
        let task = relay::concurrency::spawn(async move {
            if !call.callbacks.has_error() {
                return Err(RelayErr::configuration(format!(
                    "{}::{} was consumed without an error callback",
                    call.invocation.type_name, call.invocation.method
                )));
            }
            let outcome = inner.execute(call.invocation, call.target, timeout).await;
            if !call.callbacks.deliver(outcome) {
                log::debug!("Consumer call completed without a result callback");
            }
            Ok(())
        });
        Completion { task }
    }

    /// Execute a call from a thread outside the runtime, blocking it until the
    /// outcome arrives. Must not be called from within the runtime.
    pub fn invoke_blocking(&self, call: Call) -> Result<Reply, RelayErr> {
        let runtime = match self.inner.runtime.get() {
            Some(runtime) => runtime.clone(),
            None => return Err(RelayErr::shutdown("Instance has not been started")),
        };
        let inner = self.inner.clone();
        let timeout = call.timeout.unwrap_or(inner.call_timeout);
        let task = runtime.spawn(async move {
            inner.execute(call.invocation, call.target, timeout).await
        });
        futures::executor::block_on(task)
            .map_err(|_| RelayErr::shutdown("The call was abandoned"))?
    }
}

impl DispatcherInner {
    async fn execute(
        self: Arc<Self>,
        invocation: Invocation,
        target: Target,
        timeout: Duration,
    ) -> Result<Reply, RelayErr> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(RelayErr::shutdown("Instance is not accepting calls"));
        }
        // scored before this call counts toward the local load
        let local = self.local.report();
        let _in_flight = self.in_flight.enter();

        // one snapshot for resolution and invoker lookup alike
        let snapshot = self.registry.snapshot();
        let destinations = resolve(invocation.strategy, &target, &local, snapshot.as_ref())?;
        let resource = target.resource().copied();
        log::trace!(
            "Routing {}::{} to {destinations:?}",
            invocation.type_name,
            invocation.method
        );

        let work = async {
            if invocation.strategy == RoutingStrategy::Aggregate {
                self.aggregate(destinations, Arc::new(invocation), snapshot, timeout)
                    .await
            } else {
                match destinations.first() {
                    Some(destination) => {
                        self.single(*destination, resource, &invocation, &snapshot, timeout)
                            .await
                    }
                    None => Err(RelayErr::routing(format!("No destination for {target}"))),
                }
            }
        };
        relay::concurrency::timeout(timeout, work)
            .await
            .map_err(|_| {
                RelayErr::handler_timeout(format!(
                    "No outcome within {}ms",
                    timeout.as_millis()
                ))
            })?
    }

    async fn single(
        &self,
        destination: Destination,
        resource: Option<ResourceId>,
        invocation: &Invocation,
        snapshot: &RegistrySnapshot,
        timeout: Duration,
    ) -> Result<Reply, RelayErr> {
        match destination {
            Destination::Local(node) => {
                self.nodes
                    .invoke(&node, resource.as_ref(), invocation)
                    .await
            }
            Destination::Remote { instance, node } => {
                snapshot
                    .remote_invoker(&instance)?
                    .invoke(node, resource, invocation, timeout)
                    .await
            }
        }
    }

    async fn aggregate(
        &self,
        destinations: Vec<Destination>,
        invocation: Arc<Invocation>,
        snapshot: Arc<RegistrySnapshot>,
        timeout: Duration,
    ) -> Result<Reply, RelayErr> {
        let mut participants: JoinSet<(NodeId, Result<Reply, RelayErr>)> = JoinSet::new();
        for destination in destinations {
            let invocation = invocation.clone();
            match destination {
                Destination::Local(node) => {
                    let nodes = self.nodes.clone();
                    participants.spawn(async move {
                        (node, nodes.invoke(&node, None, &invocation).await)
                    });
                }
                Destination::Remote { instance, node } => {
                    let invoker = snapshot.remote_invoker(&instance)?;
                    participants.spawn(async move {
                        (node, invoker.invoke(node, None, &invocation, timeout).await)
                    });
                }
            }
        }

        let mut replies = Vec::with_capacity(participants.len());
        while let Some(joined) = participants.join_next().await {
            let (node, outcome) = joined.map_err(|err| {
                RelayErr::routing(format!("Aggregate participant was lost: {err}"))
            })?;
            match outcome {
                Ok(reply) => replies.push((node, reply.into_value().unwrap_or_default())),
                Err(err) => {
                    // all-or-nothing: the first failure fails the whole call
                    participants.abort_all();
                    return Err(err);
                }
            }
        }
        replies.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Reply::Aggregate(replies))
    }
}
