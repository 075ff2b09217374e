use std::sync::Arc;
use weakmemo::{memoize_shared, MemoConfig, SharedCache, StatsSnapshot};

#[derive(Debug)]
struct Document {
    body: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("weakmemo demo");
    println!("=============\n");

    let config = MemoConfig::from_env()?;
    let cache = SharedCache::new(config);

    let word_count = cache.memoize(|(doc,): (Arc<Document>,)| doc.body.split_whitespace().count());

    let doc = Arc::new(Document {
        body: "the quick brown fox jumps over the lazy dog".to_string(),
    });
    let twin = Arc::new(Document {
        body: doc.body.clone(),
    });

    println!("first call:  {} words", word_count.call((doc.clone(),)));
    println!("second call: {} words", word_count.call((doc.clone(),)));
    println!("equal twin:  {} words", word_count.call((twin.clone(),)));

    drop(doc);
    drop(twin);
    println!("reclaimed branches: {}", word_count.purge());
    print_stats(&word_count.stats());

    let greeting = memoize_shared(|(name,): (&'static str,)| format!("hello, {name}"));
    println!("\n{}", greeting.call(("world",)));
    println!("{}", greeting.call(("world",)));
    print_stats(&greeting.stats());

    Ok(())
}

fn print_stats(stats: &StatsSnapshot) {
    println!(
        "hits: {}  misses: {}  hit rate: {:.1}%",
        stats.hits,
        stats.misses,
        stats.hit_rate() * 100.0
    );
}
