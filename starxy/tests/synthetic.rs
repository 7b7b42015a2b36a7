//! End-to-end extraction on synthetic star fields

use approx::assert_relative_eq;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::image_proc::fits::{read_fits_image, write_fits_image};
use shared::image_proc::noise::{add_gaussian_source, simple_normal_array};
use starxy::{extract_sources, Image, Outcome, Parameters, SourceExtractor};
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Sky at `level` with read noise, plus `(x, y, amplitude)` Gaussian stars
fn star_field(
    width: usize,
    height: usize,
    level: f64,
    noise: f64,
    stars: &[(f64, f64, f64)],
    psf_sigma: f64,
) -> Array2<f64> {
    let mut frame = if noise > 0.0 {
        simple_normal_array((height, width), level, noise, 7)
    } else {
        Array2::from_elem((height, width), level)
    };
    for &(x, y, amplitude) in stars {
        add_gaussian_source(&mut frame, x, y, amplitude, psf_sigma);
    }
    frame
}

fn random_stars(count: usize, width: f64, height: f64, seed: u64) -> Vec<(f64, f64, f64)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            (
                rng.random_range(4.0..width - 4.0),
                rng.random_range(4.0..height - 4.0),
                rng.random_range(200.0..2000.0),
            )
        })
        .collect()
}

#[test]
fn test_single_star_position_and_flux() {
    init_logging();
    let (x, y, amplitude, psf_sigma) = (30.3, 25.7, 500.0, 1.5);
    let frame = star_field(64, 64, 100.0, 2.0, &[(x, y, amplitude)], psf_sigma);

    let params = Parameters::builder().dpsf(psf_sigma).dlim(5.0).build().unwrap();
    let extraction = extract_sources(&Image::new(frame).unwrap(), &params).unwrap();

    assert_eq!(extraction.outcome(), Outcome::SourcesFound(1));
    let source = extraction.sources[0];
    assert!((source.x - x).abs() < 0.1, "x = {}", source.x);
    assert!((source.y - y).abs() < 0.1, "y = {}", source.y);

    let expected_flux = 2.0 * std::f64::consts::PI * psf_sigma * psf_sigma * amplitude;
    assert_relative_eq!(source.flux, expected_flux, max_relative = 0.05);
    assert_relative_eq!(source.background, 100.0, epsilon = 1.0);
}

#[test]
fn test_close_pair_reports_first_in_scan_order() {
    init_logging();
    // The later star is brighter; scan order still decides
    let stars = [(20.0, 20.0, 400.0), (30.0, 20.0, 800.0)];
    let frame = star_field(48, 40, 0.0, 0.0, &stars, 0.8);

    let base = Parameters::builder().dpsf(0.8).sigma(1.0).plim(5.0);

    let merged = extract_sources(
        &Image::new(frame.clone()).unwrap(),
        &base.clone().dlim(12.0).build().unwrap(),
    )
    .unwrap();
    assert_eq!(merged.sources.len(), 1);
    assert_relative_eq!(merged.sources[0].x, 20.0, epsilon = 0.05);

    let separate = extract_sources(
        &Image::new(frame).unwrap(),
        &base.dlim(8.0).build().unwrap(),
    )
    .unwrap();
    assert_eq!(separate.sources.len(), 2);
    assert_relative_eq!(separate.sources[0].x, 20.0, epsilon = 0.05);
    assert_relative_eq!(separate.sources[1].x, 30.0, epsilon = 0.05);
}

#[test]
fn test_runs_are_deterministic() {
    init_logging();
    let stars = random_stars(40, 200.0, 150.0, 11);
    let frame = star_field(200, 150, 300.0, 4.0, &stars, 1.2);
    let image = Image::new(frame).unwrap();

    let params = Parameters::builder()
        .dpsf(1.2)
        .dlim(3.0)
        .halfbox(25)
        .build()
        .unwrap();
    let extractor = SourceExtractor::new(params);

    let first = extractor.run(&image).unwrap();
    let second = extractor.run(&image).unwrap();
    assert!(!first.sources.is_empty());
    assert_eq!(first, second);
}

#[test]
fn test_all_zero_image_is_not_an_error() {
    init_logging();
    let image = Image::new(Array2::zeros((50, 40))).unwrap();
    let extraction = extract_sources(&image, &Parameters::default()).unwrap();
    assert!(extraction.sources.is_empty());
    assert_eq!(extraction.outcome(), Outcome::NoSourcesFound);
}

#[test]
fn test_crowded_field_respects_separation_and_cap() {
    init_logging();
    let stars = random_stars(300, 128.0, 128.0, 5);
    let frame = star_field(128, 128, 50.0, 1.0, &stars, 1.0);
    let image = Image::new(frame).unwrap();

    let dlim = 4.0;
    let uncapped = extract_sources(
        &image,
        &Parameters::builder().dlim(dlim).halfbox(32).build().unwrap(),
    )
    .unwrap();
    for (i, a) in uncapped.sources.iter().enumerate() {
        for b in &uncapped.sources[i + 1..] {
            assert!(a.distance(b) >= dlim, "{a:?} and {b:?} too close");
        }
    }
    assert!(uncapped.sources.len() > 25);

    let capped = extract_sources(
        &image,
        &Parameters::builder()
            .dlim(dlim)
            .halfbox(32)
            .maxnpeaks(25)
            .build()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(capped.sources.len(), 25);
    assert_eq!(capped.sources[..], uncapped.sources[..25]);
}

#[test]
fn test_single_pixel_in_small_frame() {
    init_logging();
    let mut data = Array2::<f64>::zeros((10, 10));
    data[[5, 5]] = 1000.0;

    let params = Parameters::builder()
        .dpsf(1.0)
        .plim(5.0)
        .dlim(3.0)
        .build()
        .unwrap();
    let extraction = extract_sources(&Image::new(data).unwrap(), &params).unwrap();

    assert_eq!(extraction.sources.len(), 1);
    assert!((extraction.sources[0].x - 5.0).abs() <= 0.5);
    assert!((extraction.sources[0].y - 5.0).abs() <= 0.5);
}

#[test]
fn test_downsampled_run_reports_input_pixels() {
    init_logging();
    let (x, y, amplitude, psf_sigma) = (60.4, 70.8, 1000.0, 2.0);
    let frame = star_field(128, 128, 50.0, 1.0, &[(x, y, amplitude)], psf_sigma);

    // PSF width is given in downsampled pixels
    let params = Parameters::builder()
        .dpsf(1.0)
        .dlim(5.0)
        .downsample(2)
        .build()
        .unwrap();
    let extraction = extract_sources(&Image::new(frame).unwrap(), &params).unwrap();

    assert_eq!(extraction.diagnostics.working_size.width, 64);
    assert_eq!(extraction.sources.len(), 1);
    let source = extraction.sources[0];
    assert!((source.x - x).abs() < 0.2, "x = {}", source.x);
    assert!((source.y - y).abs() < 0.2, "y = {}", source.y);

    let expected_flux = 2.0 * std::f64::consts::PI * psf_sigma * psf_sigma * amplitude;
    assert_relative_eq!(source.flux, expected_flux, max_relative = 0.05);
}

#[test]
fn test_fits_decoded_frame_matches_in_memory_run() {
    init_logging();
    let stars = random_stars(10, 96.0, 80.0, 3);
    let frame = star_field(96, 80, 200.0, 3.0, &stars, 1.3);

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("field.fits");
    write_fits_image(&frame, &path).unwrap();
    let decoded = read_fits_image(&path).unwrap();

    let params = Parameters::builder().dpsf(1.3).dlim(3.0).build().unwrap();
    let from_file = extract_sources(&Image::new(decoded).unwrap(), &params).unwrap();
    let in_memory = extract_sources(&Image::new(frame).unwrap(), &params).unwrap();

    assert!(!from_file.sources.is_empty());
    assert_eq!(from_file.sources, in_memory.sources);
}

#[test]
fn test_disabled_background_subtraction_on_clean_frame() {
    init_logging();
    let frame = star_field(40, 40, 0.0, 0.0, &[(18.0, 22.0, 300.0)], 1.0);

    let params = Parameters::builder()
        .sigma(1.0)
        .plim(5.0)
        .dlim(2.0)
        .subtract_background(false)
        .build()
        .unwrap();
    let extraction = extract_sources(&Image::new(frame).unwrap(), &params).unwrap();

    assert!(!extraction.diagnostics.background_subtracted);
    assert_eq!(extraction.sources.len(), 1);
    assert_relative_eq!(extraction.sources[0].x, 18.0, epsilon = 1e-9);
    assert_relative_eq!(extraction.sources[0].y, 22.0, epsilon = 1e-9);
    assert_eq!(extraction.sources[0].background, 0.0);
}

#[test]
fn test_kept_sky_matches_subtracted_sky() {
    init_logging();
    let truth = [(20.3, 20.6), (45.4, 40.2)];

    for (amplitude, tolerance) in [(60.0, 0.3), (400.0, 0.1)] {
        let stars: Vec<_> = truth.iter().map(|&(x, y)| (x, y, amplitude)).collect();
        let image = Image::new(star_field(64, 64, 500.0, 5.0, &stars, 1.5)).unwrap();

        let run = |subtract: bool| {
            let params = Parameters::builder()
                .dpsf(1.5)
                .dlim(3.0)
                .subtract_background(subtract)
                .build()
                .unwrap();
            extract_sources(&image, &params).unwrap()
        };
        let kept = run(false);
        let removed = run(true);

        assert!(!kept.diagnostics.background_subtracted);
        assert_eq!(kept.sources.len(), 2, "amplitude {amplitude}: {:?}", kept.sources);
        assert_eq!(removed.sources.len(), 2);

        let expected_flux = 2.0 * std::f64::consts::PI * 1.5 * 1.5 * amplitude;
        for ((source, other), &(x, y)) in kept.sources.iter().zip(&removed.sources).zip(&truth) {
            assert!((source.x - x).abs() < tolerance, "x = {} for {x}", source.x);
            assert!((source.y - y).abs() < tolerance, "y = {} for {y}", source.y);
            assert_relative_eq!(source.flux, expected_flux, max_relative = 0.4);
            assert_relative_eq!(source.background, 500.0, epsilon = 1.0);

            assert_relative_eq!(source.x, other.x, epsilon = 1e-6);
            assert_relative_eq!(source.y, other.y, epsilon = 1e-6);
            assert_relative_eq!(source.flux, other.flux, max_relative = 1e-6);
        }
    }
}
