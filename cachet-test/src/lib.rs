//! Test doubles shared by the `cachet` unit, integration and doc tests.

pub mod queries;
mod server;

pub use server::{respond_with, DogServer, Handler, MockTransport};
use std::sync::{Arc, Mutex};

/// Counts listener calls across threads.
#[derive(Debug)]
pub struct Counter {
    n: u32
}

impl Counter {
    pub fn sync() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self { n: 0 }))
    }

    pub fn inc_sync(counter: &Arc<Mutex<Self>>) {
        let mut this = counter.lock().unwrap();
        this.n += 1;
    }

    pub fn get_sync(counter: &Arc<Mutex<Self>>) -> u32 {
        counter.lock().unwrap().n
    }
}
