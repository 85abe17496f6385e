use cachet::{Document, QueryError, Response, Transport, Variables};
use serde_json::{json, Value};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex
    },
    time::Duration
};
use tokio::time::sleep;

/// Answers requests on behalf of a [`MockTransport`].
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, document: &Document, variables: &Variables) -> Result<Response, QueryError>;
}

impl<F> Handler for F
where
    F: Fn(&Document, &Variables) -> Result<Response, QueryError> + Send + Sync + 'static
{
    fn handle(&self, document: &Document, variables: &Variables) -> Result<Response, QueryError> {
        self(document, variables)
    }
}

/// Pins down the signature of a closure handler so its arguments don't need annotations.
pub fn respond_with<F>(handler: F) -> F
where
    F: Fn(&Document, &Variables) -> Result<Response, QueryError> + Send + Sync + 'static
{
    handler
}

type DelayFn = Box<dyn Fn(&Variables) -> Duration + Send + Sync>;

/// A transport that counts its calls and can simulate latency.
pub struct MockTransport {
    handler: Box<dyn Handler>,
    delay: Option<DelayFn>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize
}

impl MockTransport {
    pub fn new<H: Handler>(handler: H) -> Arc<Self> {
        Arc::new(Self::build(handler, None))
    }

    /// Every request takes `delay` to settle.
    pub fn with_delay<H: Handler>(handler: H, delay: Duration) -> Arc<Self> {
        Self::with_delay_fn(handler, move |_| delay)
    }

    /// Requests take as long as `delay` says for their variables.
    pub fn with_delay_fn<H, F>(handler: H, delay: F) -> Arc<Self>
    where
        H: Handler,
        F: Fn(&Variables) -> Duration + Send + Sync + 'static
    {
        Arc::new(Self::build(handler, Some(Box::new(delay))))
    }

    fn build<H: Handler>(handler: H, delay: Option<DelayFn>) -> Self {
        MockTransport {
            handler: Box::new(handler),
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0)
        }
    }

    /// How many requests reached the transport.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The most requests that were ever on the wire at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn execute(
        &self,
        document: &Document,
        variables: &Variables
    ) -> Result<Response, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        if let Some(delay) = &self.delay {
            sleep(delay(variables)).await;
        }
        let response = self.handler.handle(document, variables);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

#[derive(Clone, Debug)]
struct Dog {
    id: u32,
    display_image: String
}

/// A tiny in-memory backend for `GetDog` and `GetDogs`.
///
/// Dogs are looked up by breed. Images can be changed between requests to simulate updates on
/// the server, clones share the same dogs.
#[derive(Clone)]
pub struct DogServer {
    dogs: Arc<Mutex<BTreeMap<String, Dog>>>
}

impl Default for DogServer {
    fn default() -> Self {
        let dogs = vec![("pug", 1), ("bulldog", 2), ("husky", 3)]
            .into_iter()
            .map(|(breed, id)| {
                let dog = Dog {
                    id,
                    display_image: format!("{}.jpg", breed)
                };
                (breed.to_string(), dog)
            })
            .collect();
        DogServer {
            dogs: Arc::new(Mutex::new(dogs))
        }
    }
}

impl DogServer {
    pub fn set_image(&self, breed: &str, display_image: &str) {
        if let Some(dog) = self.dogs.lock().unwrap().get_mut(breed) {
            dog.display_image = display_image.to_string();
        }
    }

    fn dog_json(breed: &str, dog: &Dog) -> Value {
        json!({
            "__typename": "Dog",
            "id": dog.id,
            "breed": breed,
            "displayImage": dog.display_image
        })
    }
}

impl Handler for DogServer {
    fn handle(&self, document: &Document, variables: &Variables) -> Result<Response, QueryError> {
        let dogs = self.dogs.lock().unwrap();
        let data = match document.operation_name() {
            "GetDog" => {
                let breed = variables.get("breed").and_then(Value::as_str).unwrap_or_default();
                let dog = dogs.get(breed).map(|dog| Self::dog_json(breed, dog));
                json!({ "dog": dog })
            }
            "GetDogs" => {
                let all: Vec<Value> = dogs
                    .iter()
                    .map(|(breed, dog)| Self::dog_json(breed, dog))
                    .collect();
                json!({ "dogs": all })
            }
            other => {
                return Ok(Response {
                    data: None,
                    errors: Some(vec![cachet::Error::new(format!("unknown operation {}", other))])
                })
            }
        };
        Ok(Response::data(data))
    }
}
