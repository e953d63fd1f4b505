// Typed REST endpoints, one module per resource.
//
// Each module adds methods to `ApiClient` on top of the typed request
// helpers; none of them talk to the transport directly.

mod account;
mod devices;
mod events;
mod groups;
