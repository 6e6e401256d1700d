//! # Collaborative Log: two replicas append concurrently and converge
//!
//! Demonstrates how two devices append to their own copy of a shared log,
//! exchange logs, and end up with the same entries in the same order.
//! One replica then persists the log to SQLite and a third device loads it
//! back from the manifest cid.
//!
//! Run: `cargo run -p crdt-log --example collaborative`

use std::sync::Arc;

use crdt_log::prelude::*;
use crdt_log_store::SqliteStore;

fn main() {
    println!("=== Collaborative Log Example ===\n");

    let access: Arc<dyn AccessController> = Arc::new(WriteAccess::new(["laptop", "phone"]));

    // ── Step 1: Two devices open the same log ───────────────────────
    println!("1. Laptop and phone open the \"notes\" log...");

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let mut laptop = Log::builder(
        Arc::clone(&store),
        Arc::clone(&access),
        Arc::new(Identity::generate("laptop")),
    )
    .log_id("notes")
    .build()
    .unwrap();
    let mut phone = Log::builder(
        Arc::new(MemoryStore::new()),
        Arc::clone(&access),
        Arc::new(Identity::generate("phone")),
    )
    .log_id("notes")
    .build()
    .unwrap();

    // ── Step 2: Both append while offline ───────────────────────────
    println!("\n2. Both append while offline...");

    laptop.append("buy milk").unwrap();
    laptop.append("call the plumber").unwrap();
    phone.append("book flights").unwrap();

    println!("   laptop:\n{}", indent(&laptop.to_string()));
    println!("   phone:\n{}", indent(&phone.to_string()));

    // ── Step 3: Exchange logs ───────────────────────────────────────
    println!("\n3. Devices meet and join each other's logs...");

    laptop.join(&phone, None).unwrap();
    phone.join(&laptop, None).unwrap();

    assert_eq!(laptop.values(), phone.values());
    assert_eq!(laptop.heads().len(), 2);
    println!("   both now hold {} entries with 2 heads", laptop.len());

    // ── Step 4: The next append merges the branches ─────────────────
    println!("\n4. Laptop appends again, closing both branches...");

    let entry = laptop.append("pack bags").unwrap();
    println!(
        "   new entry {} at time {} points at {} parents",
        entry.cid,
        entry.clock.time(),
        entry.next.len()
    );
    println!("{}", indent(&laptop.to_string()));

    // ── Step 5: Persist and reload ──────────────────────────────────
    println!("\n5. Storing the manifest and loading it on a tablet...");

    let manifest = laptop.to_cid().unwrap();
    let tablet = Log::from_cid(
        Arc::clone(&store),
        Arc::clone(&access),
        Arc::new(Identity::generate("tablet")),
        &manifest,
        LoadOptions::new(),
    )
    .unwrap();

    assert_eq!(tablet.values(), laptop.values());
    println!(
        "   tablet loaded {} entries ({} blocks in sqlite)",
        tablet.len(),
        store.block_count().unwrap()
    );

    println!("\n   Convergence verified: every device agrees!");
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("     {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
