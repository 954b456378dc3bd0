//! Integration tests for the crossflow analytics core.
//!
//! These tests drive complete per-frame workflows across multiple modules:
//! synthetic camera pans through the motion estimator, zone-crossing sessions
//! through the counter, and the overlay renderer on real frame buffers.

use image::{Rgb, RgbImage};
use nalgebra::DMatrix;

use crossflow::{
    AbsolutePaths, CoordinateTransformation, FlowConfig, HomographyTransformationGetter,
    MotionEstimator, OverlayStyle, Zone, ZoneCounter, ZoneLabel, ZoneLayout,
};

const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// Deterministic block texture in RGB, shifted by whole texels to simulate a
/// panning camera over a static scene.
fn block_rgb(width: u32, height: u32, shift_x: i64, shift_y: i64) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let value = texel(x as i64 + shift_x, y as i64 + shift_y);
        Rgb([value, value, value])
    })
}

fn texel(u: i64, v: i64) -> u8 {
    let bu = u.div_euclid(6) as u64;
    let bv = v.div_euclid(6) as u64;
    let mut h = bu
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(bv.wrapping_mul(0xC2B2_AE3D_27D4_EB4F));
    h ^= h >> 33;
    h = h.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    h ^= h >> 33;
    (h & 0xFF) as u8
}

fn probe(transform: &dyn CoordinateTransformation, x: f64, y: f64) -> (f64, f64) {
    let point = DMatrix::from_row_slice(1, 2, &[x, y]);
    let out = transform.rel_to_abs(&point);
    (out[(0, 0)], out[(0, 1)])
}

/// True if any pixel in the 3x3 neighborhood of (x, y) differs from black.
fn lit_near(frame: &RgbImage, x: u32, y: u32) -> bool {
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            let px = x as i64 + dx;
            let py = y as i64 + dy;
            if px >= 0
                && py >= 0
                && (px as u32) < frame.width()
                && (py as u32) < frame.height()
                && *frame.get_pixel(px as u32, py as u32) != BLACK
            {
                return true;
            }
        }
    }
    false
}

// =============================================================================
// Test 1: Complete Pipeline (motion + paths + counting)
// =============================================================================

#[test]
fn test_integration_complete_pipeline() {
    // Camera pans right 2px per frame while a vehicle drives down toward a
    // horizontal counting line anchored to the frame.
    let layout = ZoneLayout::new(vec![
        Zone::new(ZoneLabel::LeftEntry, [0.0, 100.0], [130.0, 100.0]).expect("zone"),
    ])
    .expect("layout");
    let mut counter: ZoneCounter<String> = ZoneCounter::new(layout).expect("counter");
    let mut estimator = MotionEstimator::default();
    let mut paths: AbsolutePaths<String> = AbsolutePaths::default();

    let track_id = "car-1".to_string();
    let mut crossing_frame = None;

    for frame_idx in 0..3i64 {
        let shift = frame_idx * 2;
        let frame = block_rgb(160, 120, shift, 0);
        let transform = estimator.update(&frame, None).expect("motion update");

        // Static scene: a frame point maps back by exactly the pan so far
        let (ax, ay) = probe(transform.as_ref(), 80.0, 60.0);
        assert!(
            (ax - (80.0 + shift as f64)).abs() < 1.0,
            "Frame {}: abs x {:.2}",
            frame_idx,
            ax
        );
        assert!((ay - 60.0).abs() < 1.0, "Frame {}: abs y {:.2}", frame_idx, ay);

        // Vehicle world position (50, 80 + 10*frame); what the camera sees is
        // shifted left by the pan
        let cx = 50.0 - shift as f64;
        let cy = 80.0 + 10.0 * frame_idx as f64;
        let extent = [[cx - 4.0, cy - 3.0], [cx + 4.0, cy + 3.0]];

        let events = counter.register(&track_id, &extent);
        if !events.is_empty() {
            assert_eq!(events[0].zone, ZoneLabel::LeftEntry);
            crossing_frame = Some(frame_idx);
        }

        paths.record(&track_id, [cx, cy], transform.as_ref());
    }

    // The vehicle reaches y = 100 on the third frame
    assert_eq!(crossing_frame, Some(2), "expected the crossing on frame 2");
    assert_eq!(counter.count_for(ZoneLabel::LeftEntry), 1);
    assert_eq!(counter.counts().entries(), 1);
    assert_eq!(counter.counts().exits(), 0);

    // The trail is stored in absolute coordinates: re-projected through the
    // final transform it sits at world x = 50 minus the final pan of 4
    assert_eq!(paths.history_len(&track_id), 3);
    let final_transform = estimator
        .update(&block_rgb(160, 120, 4, 0), None)
        .expect("repeat frame");
    let mut overlay = RgbImage::from_pixel(160, 120, BLACK);
    paths.draw(&mut overlay, final_transform.as_ref());
    assert!(lit_near(&overlay, 46, 80), "trail start missing");
    assert!(lit_near(&overlay, 46, 100), "trail end missing");
}

// =============================================================================
// Test 2: Pan Compensation Across Frames
// =============================================================================

#[test]
fn test_integration_pan_compensation() {
    let mut estimator = MotionEstimator::default();

    // Growing pan against a fixed reference frame
    for (frame_idx, shift) in [(0i64, 0i64), (1, 2), (2, 4), (3, 6)] {
        let transform = estimator
            .update(&block_rgb(200, 150, shift, shift / 2), None)
            .expect("update");

        let (x, y) = probe(transform.as_ref(), 100.0, 75.0);
        assert!(
            (x - (100.0 + shift as f64)).abs() < 1.0,
            "Frame {}: expected abs x near {}, got {:.2}",
            frame_idx,
            100 + shift,
            x
        );
        assert!(
            (y - (75.0 + (shift / 2) as f64)).abs() < 1.0,
            "Frame {}: expected abs y near {}, got {:.2}",
            frame_idx,
            75 + shift / 2,
            y
        );
    }

    let diagnostics = estimator.diagnostics();
    assert_eq!(diagnostics.frames, 4);
    assert_eq!(diagnostics.fallback_frames, 0);
}

// =============================================================================
// Test 3: Reference Renewal Under Forced Drift
// =============================================================================

#[test]
fn test_integration_reference_renewal() {
    // A proportion threshold above 1.0 forces a renewal on every fit, so the
    // accumulated chain must still express the total pan.
    let getter = HomographyTransformationGetter::new(Default::default(), 1.1);
    let mut estimator = MotionEstimator::new(FlowConfig::default(), Box::new(getter));

    for shift in [0i64, 3, 6, 9] {
        estimator.update(&block_rgb(200, 150, shift, 0), None).expect("update");
    }

    let diagnostics = estimator.diagnostics();
    assert_eq!(diagnostics.frames, 4);
    assert_eq!(diagnostics.renewals, 3, "every fit should renew the reference");

    let transform = estimator
        .update(&block_rgb(200, 150, 12, 0), None)
        .expect("final update");
    let (x, y) = probe(transform.as_ref(), 100.0, 75.0);
    assert!((x - 112.0).abs() < 1.5, "accumulated abs x {:.2}", x);
    assert!((y - 75.0).abs() < 1.5, "accumulated abs y {:.2}", y);
}

// =============================================================================
// Test 4: Degraded Frames Fall Back To Previous Transform
// =============================================================================

#[test]
fn test_integration_degraded_frames_fall_back() {
    let mut estimator = MotionEstimator::default();

    estimator.update(&block_rgb(160, 120, 0, 0), None).expect("frame 0");
    let good = estimator.update(&block_rgb(160, 120, 5, 0), None).expect("frame 1");
    let (gx, _) = probe(good.as_ref(), 50.0, 50.0);
    assert!((gx - 55.0).abs() < 1.0);

    // Featureless frames offer no correspondences at all
    let flat = RgbImage::from_pixel(160, 120, Rgb([120, 120, 120]));
    for frame_idx in 2..5u64 {
        let fallback = estimator.update(&flat, None).expect("degraded frame");
        let (x, _) = probe(fallback.as_ref(), 50.0, 50.0);
        assert!(
            (x - gx).abs() < 1e-9,
            "Frame {}: fallback transform should match the last good fit",
            frame_idx
        );
    }

    let diagnostics = estimator.diagnostics();
    assert_eq!(diagnostics.frames, 5);
    assert_eq!(diagnostics.fallback_frames, 3);
}

// =============================================================================
// Test 5: Zone-Crossing Session
// =============================================================================

#[test]
fn test_integration_zone_crossing_session() {
    let mut counter: ZoneCounter<String> = ZoneCounter::new(ZoneLayout::default()).expect("layout");

    // car-1 crosses the left entry line; repeated hits in the band must not
    // inflate the count
    let car1 = "car-1".to_string();
    for _ in 0..3 {
        let events = counter.register(&car1, &[[490.0, 645.0], [510.0, 655.0]]);
        assert!(events.len() <= 1);
    }
    assert_eq!(counter.count_for(ZoneLabel::LeftEntry), 1);
    assert!(counter.has_crossed(ZoneLabel::LeftEntry, &car1));

    // A different vehicle on the same line is a second crossing
    let car2 = "car-2".to_string();
    let events = counter.register(&car2, &[[700.0, 645.0], [740.0, 655.0]]);
    assert_eq!(events.len(), 1);
    assert_eq!(counter.count_for(ZoneLabel::LeftEntry), 2);

    // car-2 later leaves over the right exit line
    let events = counter.register(&car2, &[[1080.0, 490.0], [1120.0, 510.0]]);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].zone, ZoneLabel::RightExit);

    let counts = counter.counts();
    assert_eq!(counts.left_entry, 2);
    assert_eq!(counts.right_exit, 1);
    assert_eq!(counts.entries(), 2);
    assert_eq!(counts.exits(), 1);

    // Centers outside a band register nothing
    let events = counter.register(&car1, &[[480.0, 600.0], [520.0, 620.0]]);
    assert!(events.is_empty());
    assert_eq!(counter.counts().entries(), 2, "counts must stay monotonic");
}

// =============================================================================
// Test 6: Layout From JSON
// =============================================================================

#[test]
fn test_integration_layout_from_json() {
    let json = r#"{
        "zones": [
            { "label": "left_entry", "start": [0.0, 100.0], "end": [200.0, 100.0] },
            { "label": "right_exit", "start": [50.0, 20.0], "end": [50.0, 90.0], "band_half_width": 2.0 }
        ]
    }"#;

    let layout = ZoneLayout::from_json(json).expect("parse layout");
    assert_eq!(layout.zones.len(), 2);
    assert!((layout.zones[0].band_half_width - 1.0).abs() < 1e-12, "default band");
    layout.validate_against_frame(320, 240).expect("fits the frame");

    let mut counter: ZoneCounter<u32> = ZoneCounter::new(layout).expect("counter");

    // Vertical zone: the band lies on the x axis
    let events = counter.register(&11, &[[47.0, 50.0], [51.0, 60.0]]);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].zone, ZoneLabel::RightExit);
    assert_eq!(counter.counts().exits(), 1);
}

// =============================================================================
// Test 7: Stock Layout Geometry
// =============================================================================

#[test]
fn test_integration_stock_layout_geometry() {
    let layout = ZoneLayout::default();
    layout.validate().expect("stock layout is internally consistent");

    // The stock right-exit line runs far past any real frame edge, which the
    // frame check surfaces
    let err = layout
        .validate_against_frame(1280, 720)
        .expect_err("must flag right exit");
    assert!(err.to_string().contains("right_exit"), "got: {err}");

    // The other three zones fit a 1280x720 frame
    for zone in &layout.zones {
        if zone.label != ZoneLabel::RightExit {
            assert!(zone.start[0] >= 0.0 && zone.end[0] <= 1280.0);
            assert!(zone.start[1] >= 0.0 && zone.end[1] <= 720.0);
        }
    }
}

// =============================================================================
// Test 8: Overlay Rendering On Real Frames
// =============================================================================

#[test]
fn test_integration_overlay_rendering() {
    let style = OverlayStyle::default();
    let mut counter: ZoneCounter<String> = ZoneCounter::new(ZoneLayout::default()).expect("layout");
    let bus = "bus-7".to_string();

    // Frame without crossings: all zone lines in the static color
    let mut frame = RgbImage::from_pixel(1280, 720, BLACK);
    let events = counter.register_and_render(&bus, &[[300.0, 100.0], [340.0, 130.0]], &mut frame);
    assert!(events.is_empty());
    assert_eq!(*frame.get_pixel(500, 650), style.zone_color);
    assert_eq!(*frame.get_pixel(100, 170), style.zone_color);

    // Count labels render above each line start
    let label_pixels = (0..90u32)
        .flat_map(|x| (620..645u32).map(move |y| (x, y)))
        .filter(|&(x, y)| *frame.get_pixel(x, y) == style.text_color)
        .count();
    assert!(label_pixels > 20, "expected label text, lit {label_pixels} pixels");

    // A crossing flashes its line thicker and in the flash color
    let mut frame = RgbImage::from_pixel(1280, 720, BLACK);
    let events = counter.register_and_render(&bus, &[[480.0, 640.0], [520.0, 660.0]], &mut frame);
    assert_eq!(events.len(), 1);
    assert_eq!(*frame.get_pixel(500, 655), style.flash_color);
    assert_eq!(*frame.get_pixel(100, 170), style.zone_color, "other zones stay static");

    // The next frame the flash is gone again
    let mut frame = RgbImage::from_pixel(1280, 720, BLACK);
    counter.register_and_render(&bus, &[[480.0, 640.0], [520.0, 660.0]], &mut frame);
    assert_eq!(*frame.get_pixel(500, 655), BLACK);
    assert_eq!(*frame.get_pixel(500, 650), style.zone_color);
}

// =============================================================================
// Test 9: Flow Debug Overlay From The Estimator
// =============================================================================

#[test]
fn test_integration_flow_overlay() {
    let style = OverlayStyle::default();
    let mut estimator = MotionEstimator::default();

    estimator.update(&block_rgb(160, 120, 0, 0), None).expect("frame 0");
    let mut frame = block_rgb(160, 120, 4, 0);
    estimator.update(&frame, None).expect("frame 1");

    let field = estimator.last_flow().expect("flow recorded").clone();
    assert!(!field.is_empty());
    crossflow::drawing::draw_flow(&mut frame, &field, &style);

    // Every arrow starts at a tracked current-frame position
    let sample = field.curr_points[0];
    let sx = sample[0].round() as i64;
    let sy = sample[1].round() as i64;
    let mut found = false;
    'search: for dy in -2i64..=2 {
        for dx in -2i64..=2 {
            let px = sx + dx;
            let py = sy + dy;
            if px >= 0
                && py >= 0
                && (px as u32) < frame.width()
                && (py as u32) < frame.height()
                && *frame.get_pixel(px as u32, py as u32) == style.flow_color
            {
                found = true;
                break 'search;
            }
        }
    }
    assert!(found, "flow arrow missing near ({sx}, {sy})");
}
