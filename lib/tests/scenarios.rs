use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use haarsig::{
    compute_signature, compute_signature_from_rgb, score, ImageData, Mode, QueryConfig,
    QueryIndex, Signature, DB, NUM_CHANNELS, NUM_COEFS,
};
use image::{DynamicImage, Rgb, RgbImage};

fn photo(width: u32, height: u32, seed: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        // Unit square coordinates keep the picture the same at every size.
        let u = (x as f64 + 0.5) / width as f64;
        let v = (y as f64 + 0.5) / height as f64;
        let (du, dv) = (u - 0.5, v - 0.3 - seed as f64 * 0.05);
        let disc = du * du + dv * dv < 0.04 + seed as f64 * 0.01;
        let stripe = ((u * (3 + seed) as f64) as u32) % 2 == 0;
        match (disc, stripe) {
            (true, _) => Rgb([240, 200 - seed as u8 * 10, 40]),
            (false, true) => Rgb([30, 60, 90 + seed as u8 * 5]),
            (false, false) => Rgb([110, 120, 130]),
        }
    }))
}

#[test]
fn solid_color_is_stable() {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(256, 256, Rgb([90, 160, 20])));
    let a = compute_signature(&img).unwrap();
    let b = compute_signature(&img).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.sig, b.sig);
    for channel in 0..NUM_CHANNELS {
        let expected: Vec<i16> = (1..=NUM_COEFS as i16).collect();
        assert_eq!(a.channel(channel), &expected[..]);
    }
}

#[test]
fn any_size_gives_full_signature() {
    for (w, h) in [(1, 1), (2, 3), (127, 129), (640, 480), (2000, 10)] {
        let sig = compute_signature(&photo(w, h, 1)).unwrap();
        assert_eq!(sig.sig.len(), NUM_CHANNELS * NUM_COEFS);
        assert!(sig.check().is_ok());
    }
}

#[test]
fn raw_buffers_match_decoded_images() {
    let img = photo(200, 150, 2);
    let rgb = img.to_rgb8();
    let from_raw = compute_signature_from_rgb(200, 150, rgb.as_raw()).unwrap();
    assert_eq!(from_raw, compute_signature(&img).unwrap());
    assert!(compute_signature_from_rgb(0, 0, &[]).is_err());
}

#[test]
fn brightness_offset_keeps_detail() {
    let plane = |offset: f64| {
        ImageData::from_fn(|x, y| {
            let edge = if x > 50 && y < 90 { 120.0 } else { 15.0 };
            let noise = ((x * 31 + y * 17) % 11) as f64;
            [edge + noise + offset, noise + offset, edge / 3.0 + offset]
        })
    };
    let plain = plane(0.0).signature();
    let brighter = plane(10.0).signature();
    assert_eq!(plain.sig, brighter.sig);
    assert!(brighter.avgl.0 > plain.avgl.0);
}

#[test]
fn codec_round_trip_through_hash() {
    let sig = compute_signature(&photo(300, 200, 3)).unwrap();
    let decoded = Signature::decode(&sig.encode()).unwrap();
    assert_eq!(decoded, sig);
    let parsed: Signature = sig.to_string().parse().unwrap();
    assert_eq!(parsed, sig);
}

#[test]
fn self_beats_different_image() {
    let a = compute_signature(&photo(300, 200, 1)).unwrap();
    let b = compute_signature(&photo(300, 200, 5)).unwrap();
    for mode in [Mode::Photographic, Mode::Sketch] {
        assert!(score(&a, &a, mode).unwrap() < score(&a, &b, mode).unwrap());
    }
}

#[test]
fn resized_copy_ranks_first() {
    let db = DB::default();
    for seed in 1..6 {
        db.insert(seed as u64, compute_signature(&photo(400, 300, seed)).unwrap())
            .unwrap();
    }
    let query = compute_signature(&photo(200, 150, 3)).unwrap();
    let results = db.query(&query, &QueryConfig::new()).unwrap();
    assert_eq!(results[0].id, 3);
}

#[test]
fn removed_images_never_come_back() {
    let index = QueryIndex::new();
    let sig = compute_signature(&photo(64, 64, 2)).unwrap();
    index.insert(11, &sig);
    index.insert(12, &sig);
    index.remove(11, &sig);
    let candidates = index.candidates_for(&sig, 1);
    assert!(!candidates.contains(&11));
    assert!(candidates.contains(&12));
}

#[test]
fn concurrent_inserts_and_queries() {
    let db = Arc::new(DB::default());
    let signatures: Arc<Vec<Signature>> = Arc::new(
        (1..5)
            .map(|seed| compute_signature(&photo(120, 90, seed)).unwrap())
            .collect(),
    );

    let writers: Vec<_> = (0..4u64)
        .map(|t| {
            let db = Arc::clone(&db);
            let signatures = Arc::clone(&signatures);
            thread::spawn(move || {
                for i in 0..25u64 {
                    let id = t * 100 + i;
                    db.insert(id, signatures[(i % 4) as usize].clone()).unwrap();
                }
            })
        })
        .collect();
    let reader = {
        let db = Arc::clone(&db);
        let signatures = Arc::clone(&signatures);
        thread::spawn(move || {
            for _ in 0..20 {
                db.query(&signatures[0], &QueryConfig::new()).unwrap();
            }
        })
    };
    for handle in writers {
        handle.join().unwrap();
    }
    reader.join().unwrap();

    assert_eq!(db.len(), 100);
    let config = QueryConfig::new().with_limit(1000).with_min_shared(NUM_CHANNELS * NUM_COEFS);
    let exact = db.query(&signatures[0], &config).unwrap();
    assert_eq!(exact.len(), 28);
    assert!(exact.iter().all(|m| m.id % 100 % 4 == 0));
}

#[test]
fn removal_is_visible_once_it_returns() {
    let db = Arc::new(DB::default());
    let sig = compute_signature(&photo(120, 90, 2)).unwrap();
    let ids: Vec<u64> = (0..40).collect();
    for &id in &ids {
        db.insert(id, sig.clone()).unwrap();
    }
    let config = QueryConfig::new().with_limit(1000);
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let (db, sig, config, done) =
                (Arc::clone(&db), sig.clone(), config.clone(), Arc::clone(&done));
            thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    db.query(&sig, &config).unwrap();
                }
            })
        })
        .collect();
    let writer = {
        let (db, sig, done) = (Arc::clone(&db), sig.clone(), Arc::clone(&done));
        thread::spawn(move || {
            let mut id = 1000;
            while !done.load(Ordering::Relaxed) && id < 1500 {
                db.insert(id, sig.clone()).unwrap();
                id += 1;
            }
        })
    };

    for &id in &ids {
        assert!(db.remove(id).is_some());
        let results = db.query(&sig, &config).unwrap();
        assert!(results.iter().all(|m| m.id > id));
    }
    done.store(true, Ordering::Relaxed);
    for handle in readers {
        handle.join().unwrap();
    }
    writer.join().unwrap();
    assert!(db.query(&sig, &config).unwrap().iter().all(|m| m.id >= 1000));
}
