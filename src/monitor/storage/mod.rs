//!  Storage is organized through [duration_store::JsonDurationStore].
//!  The basic idea is:
//!   - There is a single JSON file in the application directory.
//!   - It holds an object mapping `YYYY-MM-DD` to the online time of that day as `HH:MM:SS`.
//!   - Every write rewrites the whole object, a day written twice keeps the latest value.

pub mod duration_store;
pub mod entities;
