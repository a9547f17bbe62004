// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

#[macro_use]
extern crate criterion;

use std::collections::BTreeSet;

use criterion::BatchSize;
use criterion::Criterion;
use rand::Rng;
use relay::invocation::Target;
use relay::routing::{resolve, Candidate};
use relay::{ApplicationId, InstanceId, InstanceMetadata, MembershipView, NodeId, RoutingStrategy};

struct Members {
    candidates: Vec<Candidate>,
}

impl MembershipView for Members {
    fn instance_hosting(&self, node: &NodeId) -> Option<InstanceId> {
        self.candidates
            .iter()
            .find(|c| c.node_id == *node)
            .map(|c| c.instance_id)
    }

    fn candidates(&self, application: &ApplicationId) -> Vec<Candidate> {
        self.candidates
            .iter()
            .filter(|c| c.node_id.application_id() == *application)
            .cloned()
            .collect()
    }
}

fn members(size: usize, application: ApplicationId) -> Members {
    let mut rng = rand::thread_rng();
    let candidates = (0..size)
        .map(|_| {
            let instance_id = InstanceId::random();
            Candidate {
                instance_id,
                node_id: NodeId::new(instance_id, application),
                quality: rng.gen_range(0.0..100.0),
            }
        })
        .collect();
    Members { candidates }
}

fn any_routing(c: &mut Criterion) {
    let local = InstanceMetadata::new(InstanceId::random(), 50.0, BTreeSet::new());
    for size in [10, 1000] {
        let application = ApplicationId::random();
        let view = members(size, application);
        let id = format!("ANY routing over {size} candidates");
        c.bench_function(&id, |b| {
            b.iter_batched(
                || Target::Application(application),
                |target| resolve(RoutingStrategy::Any, &target, &local, &view),
                BatchSize::SmallInput,
            );
        });
    }
}

fn aggregate_routing(c: &mut Criterion) {
    let local = InstanceMetadata::new(InstanceId::random(), 50.0, BTreeSet::new());
    for size in [10, 1000] {
        let application = ApplicationId::random();
        let view = members(size, application);
        let id = format!("AGGREGATE routing over {size} candidates");
        c.bench_function(&id, |b| {
            b.iter_batched(
                || Target::Application(application),
                |target| resolve(RoutingStrategy::Aggregate, &target, &local, &view),
                BatchSize::SmallInput,
            );
        });
    }
}

criterion_group!(routing, any_routing, aggregate_routing);
criterion_main!(routing);
