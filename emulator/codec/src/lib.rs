/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the CX2070x codec emulation library.

--*/

mod codec;

pub use codec::CodecModel;
