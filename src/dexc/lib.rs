// Copyright (c) 2025 knix
// All rights reserved.

use smallvec::SmallVec;

pub mod ast;
pub mod descriptor;
pub mod lower;
pub mod span;
pub mod types;

pub type SV4<T> = SmallVec<[T; 4]>;
pub type SV8<T> = SmallVec<[T; 8]>;
