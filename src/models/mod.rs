mod payment;
mod principal;
mod registration;
mod room;
mod semester;
mod transfer;
mod utility;

pub use payment::{ensure_payment_transition, Payment, PaymentMethod, PaymentStatus, PaymentTarget};
pub use principal::{Principal, Role};
pub use registration::{ensure_registration_transition, Registration, RegistrationStatus};
pub use room::{Bed, BedStatus, Room};
pub use semester::{Semester, Term};
pub use transfer::{ensure_transfer_transition, TransferRequest, TransferStatus};
pub use utility::{ensure_bill_transition, BillStatus, MeterReading, UtilityBill, UtilityRate};
