//! Multi-component resolution values.

/// Up to three values carried by one resolution, most important first.
///
/// Unused trailing components default to `()`. Consumers destructure as many
/// components as they need:
///
/// ```
/// use promise_kit::Manifold;
/// let Manifold(name, _, _) = Manifold::pair("dweb", 7);
/// assert_eq!(name, "dweb");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Manifold<A, B = (), C = ()>(pub A, pub B, pub C);

impl<A> Manifold<A> {
    pub fn single(primary: A) -> Self {
        Manifold(primary, (), ())
    }
}

impl<A, B> Manifold<A, B> {
    pub fn pair(primary: A, secondary: B) -> Self {
        Manifold(primary, secondary, ())
    }
}

impl<A, B, C> Manifold<A, B, C> {
    pub fn new(primary: A, secondary: B, tertiary: C) -> Self {
        Manifold(primary, secondary, tertiary)
    }

    pub fn primary(&self) -> &A {
        &self.0
    }

    pub fn secondary(&self) -> &B {
        &self.1
    }

    pub fn tertiary(&self) -> &C {
        &self.2
    }

    pub fn into_primary(self) -> A {
        self.0
    }

    pub fn into_tuple(self) -> (A, B, C) {
        (self.0, self.1, self.2)
    }
}

impl<A, B> From<(A, B)> for Manifold<A, B> {
    fn from((a, b): (A, B)) -> Self {
        Manifold(a, b, ())
    }
}

impl<A, B, C> From<(A, B, C)> for Manifold<A, B, C> {
    fn from((a, b, c): (A, B, C)) -> Self {
        Manifold(a, b, c)
    }
}
