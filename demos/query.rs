use rand::{rngs::StdRng, Rng, SeedableRng};
use voctree::*;

type P = [f32; 8];

fn jitter(rng: &mut StdRng, d: &P) -> P {
    let mut out = *d;
    for x in out.iter_mut() {
        *x += rng.gen_range(-0.05..0.05);
    }
    out
}

fn main() -> BowResult<()> {
    let mut rng = StdRng::seed_from_u64(42);

    // Stand-in for a trained tree: random centroids, k = 8, 2 levels (64 words)
    let levels: Vec<Vec<P>> = [8, 64]
        .iter()
        .map(|&n| (0..n).map(|_| rng.gen::<P>()).collect())
        .collect();
    let voc = Vocabulary::<P, 2>::from_levels(8, &levels)?;
    println!("Vocabulary = {:#?}", voc);

    // Each image sees a handful of the leaf centroids
    let images: Vec<(DocId, Vec<P>)> = (0..12)
        .map(|id| {
            let features = (0..40)
                .map(|_| {
                    let word = rng.gen_range(0..64);
                    jitter(&mut rng, &levels[1][word])
                })
                .collect();
            (id, features)
        })
        .collect();

    let config = Config {
        results: 5,
        ..Config::default()
    };
    let builder = HistogramBuilder::new(&voc).max_descriptors(config.max_descriptors);
    let documents = builder.build_all(&images);

    let mut db = Database::new(voc.words());
    let n = db.populate(documents)?;
    println!("Indexed {} images, {} descriptors", db.size(), n);
    db.compute_weights()?;
    db.write_document_map(std::io::stdout())?;

    let engine = QueryEngine::with_config(&db, &config);
    let report = engine.sanity_check()?;
    println!("Sanity check: {} wrong matches", report.wrong_matches());

    // Query with noisy copies of the first image
    let query = builder.build(&images[0].1.iter().map(|d| jitter(&mut rng, d)).collect::<Vec<_>>());
    let matches = engine.query(&query)?;
    println!("\nTop {} matches for a copy of image 0:", matches.len());
    println!("Match      |      Score");
    for m in matches.iter() {
        println!("{:<10} | {}", m.id, m.score);
    }

    let pairs = correspondence::extract_for_matches(0, &query, &matches, db.sparse_histograms());
    for ((q, d), c) in pairs.iter() {
        println!("({}, {}): {} candidate correspondences", q, d, c.len());
    }
    Ok(())
}
