
mod discovery;
mod manifest;
