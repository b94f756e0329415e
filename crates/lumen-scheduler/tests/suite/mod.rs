mod pool;
mod properties;
