pub mod playlists;
pub mod recommendations;
