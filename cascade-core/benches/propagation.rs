use std::cell::Cell;
use std::rc::Rc;

use cascade_core::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");
    for depth in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let root = Atom::new(0u64);
            let mut tail = root.map(|v| v + 1);
            let mut links = Vec::with_capacity(depth);
            for _ in 1..depth {
                let next = tail.map(|v| v + 1);
                links.push(tail);
                tail = next;
            }
            let seen = Rc::new(Cell::new(0u64));
            let sink = seen.clone();
            let _reactor = tail.react(move |v| sink.set(*v)).unwrap();

            let mut n = 0u64;
            b.iter(|| {
                n += 1;
                root.set(black_box(n)).unwrap();
            });
            black_box(seen.get());
        });
    }
    group.finish();
}

fn diamond(c: &mut Criterion) {
    let mut group = c.benchmark_group("diamond");
    for width in [4usize, 64, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            let root = Atom::new(1i64);
            let branches: Vec<Derivation<i64>> = (0..width)
                .map(|i| root.map(move |v| v * i as i64))
                .collect();
            let join = Derivation::new(move || {
                let mut total = 0;
                for branch in &branches {
                    total += branch.get()?;
                }
                Ok(total)
            });
            let _reactor = join.react(|v| {
                black_box(*v);
            })
            .unwrap();

            let mut n = 1i64;
            b.iter(|| {
                n += 1;
                root.set(black_box(n)).unwrap();
            });
        });
    }
    group.finish();
}

fn fan_out(c: &mut Criterion) {
    c.bench_function("fan_out_reactors_256", |b| {
        let root = Atom::new(0u32);
        let hits = Rc::new(Cell::new(0usize));
        let handles: Vec<ReactorHandle> = (0..256)
            .map(|_| {
                let hits = hits.clone();
                root.react(move |_| hits.set(hits.get() + 1)).unwrap()
            })
            .collect();

        let mut n = 0u32;
        b.iter(|| {
            n = n.wrapping_add(1);
            root.set(black_box(n)).unwrap();
        });
        drop(handles);
    });
}

fn transaction_batch(c: &mut Criterion) {
    c.bench_function("transaction_64_writes", |b| {
        let atoms: Vec<Atom<u32>> = (0..64).map(Atom::new).collect();
        let sum = {
            let atoms = atoms.clone();
            Derivation::new(move || {
                let mut total = 0;
                for atom in &atoms {
                    total += atom.get()?;
                }
                Ok(total)
            })
        };
        let _reactor = sum.react(|v| {
            black_box(*v);
        })
        .unwrap();

        let mut n = 0u32;
        b.iter(|| {
            n = n.wrapping_add(1);
            transaction(|| {
                for atom in &atoms {
                    atom.set(n)?;
                }
                Ok::<_, ReactiveError>(())
            })
            .unwrap();
        });
    });
}

fn disconnected_pull(c: &mut Criterion) {
    c.bench_function("disconnected_pull_depth_32", |b| {
        let root = Atom::new(3u64);
        let mut tail = root.map(|v| v * 2);
        let mut links = Vec::new();
        for _ in 1..32 {
            let next = tail.map(|v| v % 1_000_003 + 1);
            links.push(tail);
            tail = next;
        }

        b.iter(|| black_box(tail.get().unwrap()));
        tick();
    });
}

criterion_group!(
    benches,
    chain,
    diamond,
    fan_out,
    transaction_batch,
    disconnected_pull
);
criterion_main!(benches);
