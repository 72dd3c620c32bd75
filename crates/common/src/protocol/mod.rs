// Wire protocol spoken with the remote content service.

pub mod rest;
