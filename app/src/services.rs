use anyhow::Result;

/// A message to a service, with what the service answers.
pub trait Request {
    type Resp;
}

/// Answers a request without changing anything.
pub trait Queryable<Req>
where
    Req: Request,
{
    fn query(&self, req: Req) -> Result<Req::Resp>;
}

/// Applies a request as one all-or-nothing change.
pub trait Commandable<Req>
where
    Req: Request,
{
    fn execute(&self, req: Req) -> Result<Req::Resp>;
}
