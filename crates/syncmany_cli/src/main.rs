//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `syncmany_core` linkage.
//! - Print the virtual attributes the sample `Item` record declares.

use syncmany_core::Item;

fn main() {
    println!("syncmany_core ping={}", syncmany_core::ping());
    println!("syncmany_core version={}", syncmany_core::core_version());
    println!(
        "syncmany_core item_attributes={}",
        Item::declared_attributes().join(",")
    );
}
