mod block_allocator;
#[cfg(test)]
mod tests;

pub use block_allocator::*;
