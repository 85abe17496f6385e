use serde::Serialize;
use std::num::Wrapping;

/// When we have separate values it's useful to run a progressive
/// version of djb2 where we pretend that we're still looping over
/// the same value
pub fn progressive_hash<V: Serialize + ?Sized>(h: u32, x: &V) -> u64 {
    // Everything hashed here is built from strings, maps and serde_json values, none of which
    // bincode can fail to encode.
    let x = bincode::serialize(x).unwrap_or_default();

    let mut h = Wrapping(h as u64);

    for byte in x {
        h = (h << 5) + h + Wrapping(byte as u64)
    }

    h.0
}

/// Build [`Variables`](crate::Variables) inline. Values go through `serde_json::json!`.
///
/// ```
/// let variables = cachet::variables! { "breed" => "pug", "limit" => 10 };
/// assert_eq!(variables.get("limit"), Some(&serde_json::json!(10)));
/// ```
#[macro_export]
macro_rules! variables {
    () => {
        $crate::Variables::new()
    };
    ($($name: expr => $value: tt),* $(,)?) => {
        {
            let mut variables = $crate::Variables::new();
            $(
                variables.insert($name, $crate::__serde_json::json!($value));
            )*
            variables
        }
    };
}
