/// An access policy evaluated against a verified request
pub trait Policy {
    /// The request being evaluated
    type Request: ?Sized;

    /// The reason access was denied
    type Denial;

    /// Evaluates the request, returning `Ok(())` if access is granted
    fn evaluate(&self, request: &Self::Request) -> Result<(), Self::Denial>;
}
