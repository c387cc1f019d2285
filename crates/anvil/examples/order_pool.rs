//! Order book payload example: construct, use and destroy values in pool slots.

use anvil::{FixedPool, PoolConfig, CACHE_LINE_SIZE};
use tracing_subscriber::EnvFilter;

/// Cache-line sized order, as a trading engine would keep one per slot.
#[derive(Debug)]
#[repr(C, align(64))]
struct Order {
    id: u64,
    price: f64,
    quantity: i32,
}

const _: () = assert!(std::mem::size_of::<Order>() == 64);

impl Order {
    fn new(id: u64, price: f64, quantity: i32) -> Self {
        Self { id, price, quantity }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("🔧 Fixed Pool Order Example");
    println!("===========================");

    // Step 1: Create a pool with capacity for 1024 orders
    let pool = FixedPool::<Order>::with_config(PoolConfig::low_latency(1024).with_stats(true))?;
    println!(
        "✅ Created pool: {} slots of {} bytes (cache line {} bytes)",
        pool.capacity(),
        pool.slot_size(),
        CACHE_LINE_SIZE
    );

    single_order_demo(&pool)?;
    exhaustion_demo()?;

    println!("\n{}", pool.stats().format_summary());
    Ok(())
}

fn single_order_demo(pool: &FixedPool<Order>) -> anyhow::Result<()> {
    println!("\n📦 Single Order Demo");
    println!("--------------------");

    // Step 2: Allocate raw storage for one order
    let slot = pool.allocate()?;

    unsafe {
        // Step 3: Construct the order in place
        slot.as_ptr().write(Order::new(1001, 99.95, 200));

        // Step 4: Use it
        let order = &*slot.as_ptr();
        println!(
            "Order ID: {}, Price: {}, Qty: {}",
            order.id, order.price, order.quantity
        );

        // Step 5: Destroy it explicitly
        std::ptr::drop_in_place(slot.as_ptr());

        // Step 6: Return the storage to the pool
        pool.deallocate(slot);
    }

    Ok(())
}

fn exhaustion_demo() -> anyhow::Result<()> {
    println!("\n📚 Exhaustion Demo");
    println!("------------------");

    let pool = FixedPool::<Order>::new(4)?;
    let slots = (0..4)
        .map(|_| pool.allocate())
        .collect::<Result<Vec<_>, _>>()?;
    println!("Allocated {} of {} slots", slots.len(), pool.capacity());

    match pool.allocate() {
        Err(e) if e.is_exhaustion() => println!("✅ Fifth request refused: {}", e),
        Err(e) => return Err(e.into()),
        Ok(_) => anyhow::bail!("bounded pool handed out more slots than it owns"),
    }

    for slot in slots {
        unsafe { pool.deallocate(slot) };
    }
    Ok(())
}
