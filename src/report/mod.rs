pub mod summary_txt;
