use criterion::{black_box, criterion_group, criterion_main, Criterion};
use detect_core::detector::Detector;
use detect_core::pipeline::Pipeline;
use detect_core::types::RadarCube;
use rustfft::num_complex::Complex64;
use sensor_models::RadarConfig;

/// Cube with `n` point targets spread over range and Doppler.
fn make_cube(cfg: &RadarConfig, n: usize) -> RadarCube {
    let (chirps, rx, samples) = (cfg.chirps_per_frame(), cfg.num_rx, cfg.num_adc_samples);
    let loops = cfg.num_loops_per_frame as f64;
    let mut cube = RadarCube::zeros(chirps, rx, samples);
    for i in 0..n {
        let range_bin = 8.0 + (i * 37 % (samples - 16)) as f64;
        let doppler_bin = 1.0 + (i * 11 % (cfg.num_loops_per_frame - 2)) as f64;
        let spatial = 0.3 * i as f64;
        for c in 0..chirps {
            let l = (c / cfg.num_tx) as f64;
            for r in 0..rx {
                for s in 0..samples {
                    let phase = std::f64::consts::TAU
                        * (range_bin * s as f64 / samples as f64 + doppler_bin * l / loops)
                        + spatial * (c % cfg.num_tx * rx + r) as f64;
                    let idx = cube.index(c, r, s);
                    cube.as_mut_slice()[idx] += Complex64::from_polar(500.0, phase);
                }
            }
        }
    }
    cube
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);

    let cfg = RadarConfig::default();
    let pipeline = Pipeline::new(cfg.clone()).expect("default config is valid");

    for n in [1, 8, 32] {
        let cube = make_cube(&cfg, n);
        group.bench_function(format!("{n}_targets"), |b| {
            b.iter(|| black_box(pipeline.process(&cube).expect("process")));
        });
    }

    let cube = make_cube(&cfg, 8);
    let rd = detect_core::range_doppler::RangeDopplerProcessor::new(&cfg)
        .process(&cube)
        .expect("range-doppler");
    let detector = Detector::new(cfg.detection.clone(), cfg.range_resolution());
    group.bench_function("detector_only", |b| {
        b.iter(|| black_box(detector.detect(&rd.doppler)));
    });

    group.finish();
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
