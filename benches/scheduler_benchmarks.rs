use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use nn_scheduler::{DataType, Graph, OpKind, OutputRef, Scheduler};

fn out(node: usize) -> OutputRef {
    OutputRef { node, port: 0 }
}

// A deep chain of unary ops: stresses the lifetime recorder and the
// first-fit allocator's scratch reuse.
fn chain_graph(depth: usize) -> Graph {
    let mut g = Graph::new("chain", "stackvm");
    let mut value = g.add_input("x", DataType::Float32, vec![1024]);
    for i in 0..depth {
        let node = g.add_node(
            format!("op{}", i),
            OpKind::Unary,
            &[value],
            vec![(DataType::Float32, vec![1024])],
        );
        value = out(node);
    }
    g.add_output("out", value);
    g
}

// A balanced tree of concats over unary producers: stresses alias analysis
// and concat index fixing.
fn concat_tree_graph(leaves: usize) -> Graph {
    let mut g = Graph::new("concat_tree", "stackvm");
    let x = g.add_input("x", DataType::Float32, vec![16]);
    let mut level: Vec<OutputRef> = (0..leaves)
        .map(|i| {
            let node = g.add_node(
                format!("leaf{}", i),
                OpKind::Unary,
                &[x],
                vec![(DataType::Float32, vec![16])],
            );
            out(node)
        })
        .collect();

    let mut width = 16;
    let mut round = 0;
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                if pair.len() == 1 {
                    return pair[0];
                }
                let node = g.add_node(
                    format!("cat{}_{}", round, g.nodes().len()),
                    OpKind::Concat { axis: 0 },
                    pair,
                    vec![(DataType::Float32, vec![width * 2])],
                );
                out(node)
            })
            .collect();
        width *= 2;
        round += 1;
    }
    g.add_output("out", level[0]);
    g
}

fn bench_schedule_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule_chain");
    for depth in [64, 256, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter_batched(
                || chain_graph(depth),
                |mut graph| {
                    Scheduler::with_default_target()
                        .schedule(&mut graph, false)
                        .unwrap()
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_schedule_concat_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule_concat_tree");
    for leaves in [16, 64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(leaves), &leaves, |b, &leaves| {
            b.iter_batched(
                || concat_tree_graph(leaves),
                |mut graph| {
                    Scheduler::with_default_target()
                        .schedule(&mut graph, false)
                        .unwrap()
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_schedule_chain, bench_schedule_concat_tree);
criterion_main!(benches);
