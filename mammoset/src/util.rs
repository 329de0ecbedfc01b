/// An arbitrarily nested list of values.
#[derive(Debug, Clone, PartialEq)]
pub enum Nested<T> {
    Leaf(T),
    List(Vec<Nested<T>>),
}

/// Flatten a nested list into its leaves, preserving left-to-right order.
pub fn flatten<T>(items: Vec<Nested<T>>) -> Vec<T> {
    let mut out = Vec::new();
    for item in items {
        match item {
            Nested::Leaf(value) => out.push(value),
            Nested::List(inner) => out.extend(flatten(inner)),
        }
    }
    out
}
