// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;
use windchest::demo::DemoOrgan;
use windchest::engine::{EngineSetup, InterpolationType, SoundEngine, TremulantSetup, WindchestSetup};
use windchest::render::RenderPool;

const FRAMES: usize = 256;

/// An engine holding a full chord on every rank.
fn build_engine(interpolation: InterpolationType, voices: usize) -> SoundEngine {
    let mut setup = EngineSetup::new(48000, FRAMES, 0);
    setup.tremulants = vec![TremulantSetup::default()];
    setup.windchests = vec![
        WindchestSetup {
            volume_db: 0.0,
            tremulants: vec![0],
        },
        WindchestSetup::default(),
        WindchestSetup::default(),
    ];
    setup.extra_release_groups = 3;
    setup.settings.interpolation = interpolation;

    let organ = DemoOrgan::new(48000, setup.windchests.len(), None).unwrap();
    let engine = SoundEngine::new(&setup, Arc::new(organ.instrument)).unwrap();
    engine.set_tremulant(0, true).unwrap();
    let mut started = 0;
    'outer: for key in 36..=84u8 {
        for rank in &organ.ranks {
            if started == voices {
                break 'outer;
            }
            let id = rank.provider(key).unwrap();
            engine
                .start_sample(id, rank.group, 0, 100, Duration::ZERO)
                .unwrap();
            started += 1;
        }
    }
    engine
}

fn benchmark_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_thread");
    for (name, interpolation) in [
        ("linear", InterpolationType::Linear),
        ("polyphase", InterpolationType::Polyphase),
    ] {
        for voices in [16, 64, 144] {
            let engine = build_engine(interpolation, voices);
            let mut buffer = vec![0.0f32; FRAMES * 2];
            group.bench_with_input(BenchmarkId::new(name, voices), &voices, |b, _| {
                b.iter(|| black_box(engine.get_samples(black_box(&mut buffer), FRAMES)))
            });
        }
    }
    group.finish();
}

fn benchmark_render_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_pool");
    let engine = build_engine(InterpolationType::Polyphase, 144);
    for threads in [1, 2, 4] {
        let pool = RenderPool::new(Some(threads)).unwrap();
        let mut buffer = vec![0.0f32; FRAMES * 2];
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, _| {
            b.iter(|| black_box(pool.get_samples(&engine, black_box(&mut buffer), FRAMES)))
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_single_thread, benchmark_render_pool);
criterion_main!(benches);
