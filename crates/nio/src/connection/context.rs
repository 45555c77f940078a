use http::Extensions;

/// Typed attribute map of one connection, shared by the exchange handler
/// and the application callbacks.
#[derive(Debug, Default)]
pub struct HttpContext {
    attributes: Extensions,
}

impl HttpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.attributes.insert(value)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.attributes.get()
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.attributes.get_mut()
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.attributes.remove()
    }

    pub fn clear(&mut self) {
        self.attributes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct RequestCount(u32);

    #[test]
    fn typed_attributes() {
        let mut context = HttpContext::new();
        assert!(context.get::<RequestCount>().is_none());

        context.insert(RequestCount(1));
        context.get_mut::<RequestCount>().unwrap().0 += 1;
        assert_eq!(context.get::<RequestCount>(), Some(&RequestCount(2)));

        assert_eq!(context.remove::<RequestCount>(), Some(RequestCount(2)));
        assert!(context.get::<RequestCount>().is_none());
    }
}
